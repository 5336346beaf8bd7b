//! Session lifecycle: start/stop entry points and the background poll loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::asset::{ArchiveSource, AssetFetcher};
use crate::config::{SessionConfig, SinkField};
use crate::error::Result;
use crate::ftps::FtpsSource;
use crate::mqtt::ConnectionManager;
use crate::pipeline::StatusPipeline;
use crate::sink::Sink;

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ControllerState {
    config: Option<Arc<SessionConfig>>,
    worker: Option<Worker>,
}

/// Starts and stops the bridge.
///
/// At most one poll loop runs at a time; `start` joins a running loop before
/// launching a new one.
pub struct SessionController {
    sink: Arc<dyn Sink>,
    state: Mutex<ControllerState>,
}

impl SessionController {
    /// Create a stopped controller that publishes to `sink`.
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            state: Mutex::new(ControllerState::default()),
        }
    }

    /// Validate `config`, connect and launch the poll loop.
    pub async fn start(&self, config: SessionConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            error!(error = %e, "start refused");
            return Err(e);
        }

        let mut state = self.state.lock().await;
        if let Some(worker) = state.worker.take() {
            join_worker(worker).await;
            info!("existing update loop stopped");
        }

        let config = Arc::new(config);
        state.config = Some(config.clone());
        self.show_plate(&config);

        let cancel = CancellationToken::new();
        let mut manager = ConnectionManager::new(config.clone(), cancel.clone());
        if let Err(e) = manager.start().await {
            error!(error = %e, "could not connect to printer");
            return Err(e);
        }

        let pipeline = StatusPipeline::new(
            self.model_fetcher(&config),
            config.sinks.clone(),
            config.vocabulary.clone(),
            self.sink.clone(),
        );
        let handle = tokio::spawn(poll_loop(manager, pipeline, config.interval(), cancel.clone()));
        state.worker = Some(Worker { cancel, handle });
        info!("new update loop started");
        Ok(())
    }

    /// Stop the poll loop and wait for it to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        let worker = self.state.lock().await.worker.take();
        if let Some(worker) = worker {
            join_worker(worker).await;
        }
    }

    /// Whether a poll loop is running.
    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Configuration of the current or last session.
    pub async fn current_config(&self) -> Option<Arc<SessionConfig>> {
        self.state.lock().await.config.clone()
    }

    fn show_plate(&self, config: &SessionConfig) {
        let Some(target) = config.sinks.target(SinkField::Plate) else {
            return;
        };
        match config.plate_image() {
            Some(path) => self.sink.set_image(target, &path),
            None => info!(plate = ?config.plate, "no plate image for selection"),
        }
    }

    fn model_fetcher(&self, config: &SessionConfig) -> Option<AssetFetcher<FtpsSource>> {
        let target = config.sinks.target(SinkField::Model)?;
        let image_root = config.image_root.as_ref()?;
        let source = FtpsSource::new(
            config.host.clone(),
            config.ftp_port,
            config.user.clone(),
            config.access_code.clone(),
        );
        Some(AssetFetcher::new(
            source,
            image_root.clone(),
            Duration::from_secs(config.asset_timeout_secs),
            self.sink.clone(),
            target,
        ))
    }
}

async fn join_worker(worker: Worker) {
    worker.cancel.cancel();
    if let Err(e) = worker.handle.await {
        warn!(error = %e, "update loop ended abnormally");
    }
}

/// Service the connection every `interval` until `cancel` fires.
async fn poll_loop<A: ArchiveSource>(
    mut manager: ConnectionManager,
    mut pipeline: StatusPipeline<A>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let started = Instant::now();
        manager.service_once(&mut pipeline).await;

        let remaining = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(remaining) => {}
        }
    }

    manager.stop().await;
    info!("update loop stopped");
}
