//! MQTT connection to the printer's status channel.
//!
//! Network callbacks are turned into [`LinkEvent`]s and fed to
//! [`ConnectionState::on_event`], which decides what the
//! [`ConnectionManager`] does next.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    TlsConfiguration, Transport,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{BridgeError, Result};
use crate::tls;

/// Wait for one event loop poll during a service tick.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Upper bound for one service tick.
const SERVICE_BUDGET: Duration = Duration::from_secs(1);
/// Time allowed to flush the DISCONNECT packet.
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);
const KEEP_ALIVE: Duration = Duration::from_secs(60);
/// Full status reports exceed rumqttc's default packet limit.
const MAX_PACKET_SIZE: usize = 1024 * 1024;
const REQUEST_CAPACITY: usize = 10;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Session established and subscribed.
    Connected,
    /// The printer rejected the credentials. Terminal until the next start.
    AuthFailed,
}

/// Why the link went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Orderly shutdown (code 0).
    Clean,
    /// The broker refused the connection with an MQTT return code.
    Refused(u8),
    /// Network, TLS or protocol failure.
    Transport(String),
}

/// MQTT 3.1.1 return code for a bad user name or password.
pub const RC_BAD_CREDENTIALS: u8 = 4;
/// MQTT 3.1.1 return code for "not authorized".
pub const RC_NOT_AUTHORIZED: u8 = 5;

impl DisconnectCause {
    /// Whether the printer rejected the access code.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Refused(RC_BAD_CREDENTIALS | RC_NOT_AUTHORIZED))
    }
}

impl std::fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "clean disconnect"),
            Self::Refused(code) => write!(f, "refused with code {code}"),
            Self::Transport(reason) => write!(f, "{reason}"),
        }
    }
}

/// Network events relevant to the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The broker acknowledged the connection.
    Connected,
    /// The link dropped or was refused.
    Disconnected(DisconnectCause),
    /// A status report arrived.
    MessageReceived(Vec<u8>),
}

/// Follow-up the manager performs after a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Subscribe to the report topic.
    Subscribe,
    /// Make one immediate reconnect attempt.
    Reconnect,
    /// Stop the poll loop for good.
    Halt,
    /// Hand a payload to the message handler.
    Dispatch(Vec<u8>),
}

impl ConnectionState {
    /// Mark the start of a connect attempt.
    pub fn begin_connect(&mut self) {
        *self = Self::Connecting;
    }

    /// Apply an event and return the action it calls for.
    pub fn on_event(&mut self, event: LinkEvent) -> Option<LinkAction> {
        if *self == Self::AuthFailed {
            return None;
        }

        match event {
            LinkEvent::Connected => {
                if *self != Self::Connecting {
                    return None;
                }
                *self = Self::Connected;
                Some(LinkAction::Subscribe)
            }
            LinkEvent::Disconnected(cause) if cause.is_auth_rejection() => {
                *self = Self::AuthFailed;
                Some(LinkAction::Halt)
            }
            LinkEvent::Disconnected(DisconnectCause::Clean) => {
                *self = Self::Disconnected;
                None
            }
            LinkEvent::Disconnected(_) => {
                *self = Self::Connecting;
                Some(LinkAction::Reconnect)
            }
            LinkEvent::MessageReceived(payload) => {
                (*self == Self::Connected).then_some(LinkAction::Dispatch(payload))
            }
        }
    }
}

/// Receives status report payloads.
pub trait MessageHandler: Send {
    /// Handle one payload from the report topic.
    fn handle(&mut self, payload: &[u8]) -> impl Future<Output = ()> + Send;
}

struct MqttLink {
    client: AsyncClient,
    event_loop: EventLoop,
}

enum Polled {
    Idle,
    Skipped,
    Event(LinkEvent),
}

/// Owns the MQTT client and drives the connection state machine.
pub struct ConnectionManager {
    config: Arc<SessionConfig>,
    link: Option<MqttLink>,
    state: ConnectionState,
    halt: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager. `halt` is cancelled when credentials are rejected.
    pub fn new(config: Arc<SessionConfig>, halt: CancellationToken) -> Self {
        Self {
            config,
            link: None,
            state: ConnectionState::Disconnected,
            halt,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Open the session and wait for the broker's acknowledgment.
    pub async fn start(&mut self) -> Result<()> {
        if self.link.is_some() {
            self.stop().await;
        }

        info!(host = %self.config.host, port = self.config.mqtt_port, "connecting to MQTT broker");
        self.link = Some(open_link(&self.config));
        self.state.begin_connect();

        // Wait for the ConnAck
        match self.await_handshake().await {
            Some(LinkEvent::Connected) => {
                if let Some(LinkAction::Subscribe) = self.state.on_event(LinkEvent::Connected) {
                    self.subscribe().await?;
                }
                info!("MQTT connection successful");
                Ok(())
            }
            Some(LinkEvent::Disconnected(cause)) if cause.is_auth_rejection() => {
                self.state.on_event(LinkEvent::Disconnected(cause.clone()));
                self.link = None;
                error!(%cause, "incorrect access code; please verify it");
                match cause {
                    DisconnectCause::Refused(code) => Err(BridgeError::AuthRejected(code)),
                    _ => Err(BridgeError::AuthRejected(RC_NOT_AUTHORIZED)),
                }
            }
            Some(LinkEvent::Disconnected(cause)) => {
                self.state = ConnectionState::Disconnected;
                self.link = None;
                Err(BridgeError::ConnectFailed(cause.to_string()))
            }
            _ => {
                self.state = ConnectionState::Disconnected;
                self.link = None;
                Err(BridgeError::ConnectFailed(format!(
                    "no acknowledgment within {}s",
                    self.config.connect_timeout_secs
                )))
            }
        }
    }

    /// Advance the client for one tick, dispatching received reports.
    ///
    /// Returns within roughly one second, or the connect timeout when a
    /// reconnect is attempted. Network failures are logged and never
    /// returned. At most one reconnect attempt is made per tick.
    pub async fn service_once<H: MessageHandler>(&mut self, handler: &mut H) {
        if self.link.is_none() {
            return;
        }
        match self.state {
            ConnectionState::Connected => {}
            // The previous attempt failed; try once more.
            ConnectionState::Connecting => {
                self.reconnect().await;
                return;
            }
            ConnectionState::Disconnected | ConnectionState::AuthFailed => return,
        }

        let deadline = Instant::now() + SERVICE_BUDGET;
        while Instant::now() < deadline && self.state == ConnectionState::Connected {
            let event = match self.poll_link(POLL_TIMEOUT).await {
                Polled::Idle => break,
                Polled::Skipped => continue,
                Polled::Event(event) => event,
            };

            if self.apply(event, handler).await.is_break() {
                break;
            }
        }
    }

    /// Disconnect and drop the client.
    pub async fn stop(&mut self) {
        if let Some(mut link) = self.link.take() {
            if self.state == ConnectionState::Connected && link.client.try_disconnect().is_ok() {
                let _ = tokio::time::timeout(DISCONNECT_FLUSH, link.event_loop.poll()).await;
            }
            info!("MQTT connection closed");
        }
        if self.state != ConnectionState::AuthFailed {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Feed one event through the state machine. Breaks when the tick must end.
    async fn apply<H: MessageHandler>(&mut self, event: LinkEvent, handler: &mut H) -> ControlFlow<()> {
        if let LinkEvent::Disconnected(cause) = &event {
            if !cause.is_auth_rejection() && *cause != DisconnectCause::Clean {
                warn!(%cause, "unexpected disconnection from MQTT broker");
            }
        }

        match self.state.on_event(event) {
            Some(LinkAction::Subscribe) => {
                if let Err(e) = self.subscribe().await {
                    warn!(error = %e, "subscribe failed");
                }
            }
            Some(LinkAction::Reconnect) => {
                self.reconnect().await;
                return ControlFlow::Break(());
            }
            Some(LinkAction::Halt) => {
                self.halt_session();
                return ControlFlow::Break(());
            }
            Some(LinkAction::Dispatch(payload)) => handler.handle(&payload).await,
            None => {}
        }
        ControlFlow::Continue(())
    }

    /// One reconnect attempt bounded by the connect timeout. A failure is left
    /// for the next tick.
    async fn reconnect(&mut self) {
        info!("reconnecting to MQTT broker");
        let Some(event) = self.await_handshake().await else {
            warn!("reconnect attempt timed out");
            return;
        };

        match self.state.on_event(event) {
            Some(LinkAction::Subscribe) => {
                info!("MQTT connection re-established");
                if let Err(e) = self.subscribe().await {
                    warn!(error = %e, "subscribe failed");
                }
            }
            Some(LinkAction::Halt) => self.halt_session(),
            Some(LinkAction::Reconnect) => warn!("reconnect attempt failed"),
            Some(LinkAction::Dispatch(_)) | None => {}
        }
    }

    fn halt_session(&mut self) {
        // No reconnect can succeed with these credentials
        error!("incorrect access code; please verify it");
        self.link = None;
        self.halt.cancel();
    }

    async fn subscribe(&mut self) -> Result<()> {
        let Some(link) = &self.link else {
            return Err(BridgeError::Mqtt("not connected".into()));
        };

        let topic = self.config.report_topic();
        link.client
            .subscribe(&topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::Mqtt(e.to_string()))?;
        debug!(%topic, "subscribed");
        Ok(())
    }

    /// Poll until the broker acknowledges or refuses, bounded by the connect timeout.
    async fn await_handshake(&mut self) -> Option<LinkEvent> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.poll_link(remaining).await {
                Polled::Event(event @ (LinkEvent::Connected | LinkEvent::Disconnected(_))) => {
                    return Some(event);
                }
                Polled::Event(LinkEvent::MessageReceived(_)) | Polled::Skipped => continue,
                Polled::Idle => break,
            }
        }
        None
    }

    async fn poll_link(&mut self, wait: Duration) -> Polled {
        let Some(link) = self.link.as_mut() else {
            return Polled::Idle;
        };

        match tokio::time::timeout(wait, link.event_loop.poll()).await {
            Err(_) => Polled::Idle,
            Ok(Ok(event)) => match to_link_event(event, &self.config.report_topic()) {
                Some(event) => Polled::Event(event),
                None => Polled::Skipped,
            },
            Ok(Err(e)) => Polled::Event(LinkEvent::Disconnected(disconnect_cause(e))),
        }
    }
}

fn open_link(config: &SessionConfig) -> MqttLink {
    let client_id = format!("bambu-bridge_{}", uuid::Uuid::new_v4());

    // Configure MQTT options
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.mqtt_port);
    options.set_credentials(config.user.clone(), config.access_code.clone());
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    // Printer certificates are self-signed
    options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
        tls::client_config(),
    )));

    let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
    MqttLink { client, event_loop }
}

fn to_link_event(event: Event, report_topic: &str) -> Option<LinkEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => Some(match ack.code {
            ConnectReturnCode::Success => LinkEvent::Connected,
            code => LinkEvent::Disconnected(DisconnectCause::Refused(return_code(code))),
        }),
        Event::Incoming(Packet::Publish(publish)) if publish.topic == report_topic => {
            Some(LinkEvent::MessageReceived(publish.payload.to_vec()))
        }
        Event::Incoming(Packet::Disconnect) => Some(LinkEvent::Disconnected(DisconnectCause::Clean)),
        _ => None,
    }
}

fn disconnect_cause(error: ConnectionError) -> DisconnectCause {
    match error {
        ConnectionError::ConnectionRefused(code) => DisconnectCause::Refused(return_code(code)),
        other => DisconnectCause::Transport(other.to_string()),
    }
}

fn return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => RC_BAD_CREDENTIALS,
        ConnectReturnCode::NotAuthorized => RC_NOT_AUTHORIZED,
    }
}
