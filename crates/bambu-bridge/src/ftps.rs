//! Implicit FTPS client for the printer's storage.
//!
//! The printer's FTP server expects TLS from the first byte on the control
//! connection (port 990) and a protected passive data connection for every
//! transfer. Only the commands needed to download one file are implemented.

use std::sync::Arc;

use rumqttc::tokio_rustls::client::TlsStream;
use rumqttc::tokio_rustls::rustls::pki_types::ServerName;
use rumqttc::tokio_rustls::rustls::ClientConfig;
use rumqttc::tokio_rustls::TlsConnector;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::asset::ArchiveSource;
use crate::error::AssetError;
use crate::tls;

/// A server reply: three digit code and the text of its last line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code.
    pub code: u16,
    /// Reply text without the code.
    pub text: String,
}

impl Reply {
    /// Parse a single reply line. Returns the reply and whether more lines
    /// follow (`123-` continuation marker).
    pub fn parse_line(line: &str) -> Option<(Self, bool)> {
        let line = line.trim_end_matches(['\r', '\n']);
        let code = line.get(..3)?.parse().ok()?;
        let continued = line.as_bytes().get(3) == Some(&b'-');
        let text = line.get(4..).unwrap_or_default().to_string();
        Some((Self { code, text }, continued))
    }
}

/// Collects the lines of one possibly multi-line reply.
///
/// A reply opened with `123-` only ends on a `123 ` line carrying the same
/// code; anything in between is text.
#[derive(Debug, Default)]
struct ReplyAssembler {
    opening: Option<u16>,
}

impl ReplyAssembler {
    /// Feed one line. Returns the reply once its final line arrives.
    fn push(&mut self, line: &str) -> Option<Reply> {
        let (reply, continued) = Reply::parse_line(line)?;
        match self.opening {
            None if continued => {
                self.opening = Some(reply.code);
                None
            }
            None => Some(reply),
            Some(code) if code == reply.code && !continued => Some(reply),
            Some(_) => None,
        }
    }
}

/// Extract the data port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub fn parse_passive_port(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let fields: Vec<u16> = text[start + 1..end]
        .split(',')
        .map(|f| f.trim().parse())
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() != 6 || fields.iter().any(|&f| f > 255) {
        return None;
    }
    Some(fields[4] * 256 + fields[5])
}

/// Downloads files from the printer over implicit FTPS.
#[derive(Clone)]
pub struct FtpsSource {
    host: String,
    port: u16,
    user: String,
    password: String,
    tls: Arc<ClientConfig>,
}

impl FtpsSource {
    /// Create a source for `host:port` with the given credentials.
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            tls: tls::client_config(),
        }
    }
}

impl ArchiveSource for FtpsSource {
    async fn retrieve(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        let mut session = FtpsSession::connect(&self.host, self.port, self.tls.clone()).await?;
        session.login(&self.user, &self.password).await?;
        // Data connections must be encrypted as well
        session.protect_data_channel().await?;
        let data = session.retrieve(path).await?;
        session.quit().await;
        Ok(data)
    }
}

struct FtpsSession {
    control: BufReader<TlsStream<TcpStream>>,
    connector: TlsConnector,
    server_name: ServerName<'static>,
    host: String,
}

impl FtpsSession {
    async fn connect(host: &str, port: u16, config: Arc<ClientConfig>) -> Result<Self, AssetError> {
        let connector = TlsConnector::from(config);
        let server_name = tls::server_name(host);

        // Implicit TLS: handshake before the greeting
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| AssetError::ConnectionFailed(format!("{host}:{port}: {e}")))?;
        let stream = connector
            .connect(server_name.clone(), tcp)
            .await
            .map_err(|e| AssetError::ConnectionFailed(format!("TLS handshake failed: {e}")))?;

        let mut session = Self {
            control: BufReader::new(stream),
            connector,
            server_name,
            host: host.to_string(),
        };

        let greeting = session.read_reply().await?;
        expect(&greeting, &[220])?;
        Ok(session)
    }

    async fn login(&mut self, user: &str, password: &str) -> Result<(), AssetError> {
        let reply = self.command(&format!("USER {user}")).await?;
        if reply.code == 230 {
            return Ok(());
        }
        if reply.code != 331 {
            return Err(login_error(reply));
        }

        let reply = self.command(&format!("PASS {password}")).await?;
        match reply.code {
            230 | 202 => Ok(()),
            _ => Err(login_error(reply)),
        }
    }

    async fn protect_data_channel(&mut self) -> Result<(), AssetError> {
        let reply = self.command("PBSZ 0").await?;
        expect(&reply, &[200])?;
        let reply = self.command("PROT P").await?;
        expect(&reply, &[200])
    }

    async fn retrieve(&mut self, path: &str) -> Result<Vec<u8>, AssetError> {
        // Binary transfer
        let reply = self.command("TYPE I").await?;
        expect(&reply, &[200])?;

        // Passive mode
        let reply = self.command("PASV").await?;
        expect(&reply, &[227])?;
        let port = parse_passive_port(&reply.text)
            .ok_or_else(|| AssetError::ConnectionFailed(format!("bad passive reply: {}", reply.text)))?;

        // The server's passive address is ignored; it may be unreachable behind NAT.
        let tcp = TcpStream::connect((self.host.as_str(), port))
            .await
            .map_err(|e| AssetError::ConnectionFailed(format!("data connection: {e}")))?;

        let reply = self.command(&format!("RETR {path}")).await?;
        expect(&reply, &[125, 150])?;

        // The data channel handshake starts once the server has accepted RETR
        let mut data_stream = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| AssetError::ConnectionFailed(format!("data TLS handshake failed: {e}")))?;

        let mut data = Vec::new();
        if let Err(e) = data_stream.read_to_end(&mut data).await {
            // Some servers close the data connection without a TLS close_notify.
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                return Err(AssetError::ConnectionFailed(format!("transfer: {e}")));
            }
        }
        drop(data_stream);

        // Transfer complete
        let reply = self.read_reply().await?;
        expect(&reply, &[226, 250])?;
        debug!(path, bytes = data.len(), "download complete");
        Ok(data)
    }

    async fn quit(&mut self) {
        if let Ok(reply) = self.command("QUIT").await {
            debug!(code = reply.code, "closed FTPS session");
        }
    }

    async fn command(&mut self, line: &str) -> Result<Reply, AssetError> {
        let shown = if line.starts_with("PASS ") { "PASS ****" } else { line };
        debug!(command = shown, "ftp");

        self.control
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(|e| AssetError::ConnectionFailed(e.to_string()))?;
        self.control
            .flush()
            .await
            .map_err(|e| AssetError::ConnectionFailed(e.to_string()))?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply, AssetError> {
        let mut assembler = ReplyAssembler::default();
        loop {
            let mut line = String::new();
            let read = self
                .control
                .read_line(&mut line)
                .await
                .map_err(|e| AssetError::ConnectionFailed(e.to_string()))?;
            if read == 0 {
                return Err(AssetError::ConnectionFailed("control connection closed".into()));
            }

            if let Some(reply) = assembler.push(&line) {
                return Ok(reply);
            }
        }
    }
}

fn expect(reply: &Reply, allowed: &[u16]) -> Result<(), AssetError> {
    if allowed.contains(&reply.code) {
        Ok(())
    } else {
        Err(AssetError::ConnectionFailed(format!("{} {}", reply.code, reply.text)))
    }
}

fn login_error(reply: Reply) -> AssetError {
    AssetError::AuthFailed(format!("{} {}", reply.code, reply.text))
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    const PASSWORD: &str = "12345678";

    #[test]
    fn test_parse_reply_line() {
        let (reply, more) = Reply::parse_line("220 Service ready\r\n").unwrap();
        assert_eq!(reply.code, 220);
        assert_eq!(reply.text, "Service ready");
        assert!(!more);

        let (reply, more) = Reply::parse_line("211-Features:\r\n").unwrap();
        assert_eq!(reply.code, 211);
        assert!(more);

        let (reply, more) = Reply::parse_line("230\r\n").unwrap();
        assert_eq!(reply.code, 230);
        assert_eq!(reply.text, "");
        assert!(!more);

        assert!(Reply::parse_line(" PROT\r\n").is_none());
        assert!(Reply::parse_line("").is_none());
    }

    #[test]
    fn test_parse_passive_port() {
        assert_eq!(
            parse_passive_port("Entering Passive Mode (192,168,1,20,195,80)."),
            Some(195 * 256 + 80)
        );
        assert_eq!(parse_passive_port("Entering Passive Mode (10, 0, 0, 1, 4, 1)"), Some(1025));
        assert_eq!(parse_passive_port("Entering Passive Mode"), None);
        assert_eq!(parse_passive_port("(1,2,3,4,5)"), None);
        assert_eq!(parse_passive_port("(1,2,3,4,5,300)"), None);
    }

    #[test]
    fn test_expect() {
        let ok = Reply { code: 226, text: "Transfer complete".into() };
        assert!(expect(&ok, &[226, 250]).is_ok());

        let missing = Reply { code: 550, text: "No such file".into() };
        match expect(&missing, &[150]) {
            Err(AssetError::ConnectionFailed(msg)) => assert_eq!(msg, "550 No such file"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_login_error_kind() {
        let reply = Reply { code: 530, text: "Login incorrect.".into() };
        assert!(matches!(login_error(reply), AssetError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let source = FtpsSource::new("127.0.0.1", port, "bblp", "secret");
        assert!(matches!(
            source.retrieve("foo.gcode.3mf").await,
            Err(AssetError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn test_multi_line_reply_ends_on_matching_code() {
        let mut assembler = ReplyAssembler::default();
        assert_eq!(assembler.push("220-Bambu FTP\r\n"), None);
        assert_eq!(assembler.push("230 inside the greeting\r\n"), None);
        assert_eq!(assembler.push("  free text\r\n"), None);
        assert_eq!(
            assembler.push("220 Ready\r\n"),
            Some(Reply { code: 220, text: "Ready".into() })
        );

        let mut assembler = ReplyAssembler::default();
        assert_eq!(assembler.push("530 Login incorrect.\r\n").map(|r| r.code), Some(530));
    }

    async fn send<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut BufReader<S>, text: &str) {
        stream.get_mut().write_all(text.as_bytes()).await.unwrap();
        stream.get_mut().flush().await.unwrap();
    }

    /// Implicit-FTPS server for one control session, serving `files`.
    /// Resolves to the commands it received.
    async fn ftps_server(files: Vec<(&'static str, Vec<u8>)>) -> (u16, JoinHandle<Vec<String>>) {
        let control = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let data = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = control.local_addr().unwrap().port();
        let data_port = data.local_addr().unwrap().port();
        let acceptor = tls::testing::acceptor();

        let handle = tokio::spawn(async move {
            let (tcp, _) = control.accept().await.unwrap();
            let mut stream = BufReader::new(acceptor.accept(tcp).await.unwrap());
            let mut received = Vec::new();

            send(&mut stream, "220-Bambu FTP\r\n230 inside the greeting\r\n220 Ready\r\n").await;
            loop {
                let mut line = String::new();
                if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                received.push(line.clone());

                let (verb, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
                match verb {
                    "USER" => send(&mut stream, "331 Please specify the password.\r\n").await,
                    "PASS" if arg == PASSWORD => send(&mut stream, "230 Login successful.\r\n").await,
                    "PASS" => send(&mut stream, "530 Login incorrect.\r\n").await,
                    "PBSZ" | "PROT" | "TYPE" => send(&mut stream, "200 OK\r\n").await,
                    "PASV" => {
                        // Advertised address is unreachable on purpose
                        let text = format!(
                            "227 Entering Passive Mode (10,255,255,1,{},{}).\r\n",
                            data_port / 256,
                            data_port % 256
                        );
                        send(&mut stream, &text).await;
                    }
                    "RETR" => match files.iter().find(|(name, _)| *name == arg) {
                        Some((_, content)) => {
                            send(&mut stream, "150 Opening BINARY mode data connection.\r\n").await;
                            let (tcp, _) = data.accept().await.unwrap();
                            let mut channel = acceptor.accept(tcp).await.unwrap();
                            channel.write_all(content).await.unwrap();
                            channel.shutdown().await.unwrap();
                            send(&mut stream, "226-Transfer complete.\r\n226 Closing data connection.\r\n").await;
                        }
                        None => send(&mut stream, "550 Failed to open file.\r\n").await,
                    },
                    "QUIT" => {
                        send(&mut stream, "221 Goodbye.\r\n").await;
                        break;
                    }
                    _ => send(&mut stream, "502 Command not implemented.\r\n").await,
                }
            }
            received
        });

        (port, handle)
    }

    #[tokio::test]
    async fn test_retrieve_over_protected_data_channel() {
        let archive = b"PK\x03\x04 project container".to_vec();
        let (port, server) = ftps_server(vec![("benchy.gcode.3mf", archive.clone())]).await;
        let source = FtpsSource::new("127.0.0.1", port, "bblp", PASSWORD);

        let data = source.retrieve("benchy.gcode.3mf").await.unwrap();

        assert_eq!(data, archive);
        assert_eq!(
            server.await.unwrap(),
            vec![
                "USER bblp",
                "PASS 12345678",
                "PBSZ 0",
                "PROT P",
                "TYPE I",
                "PASV",
                "RETR benchy.gcode.3mf",
                "QUIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_password_is_auth_failure() {
        let (port, server) = ftps_server(Vec::new()).await;
        let source = FtpsSource::new("127.0.0.1", port, "bblp", "wrong");

        match source.retrieve("benchy.gcode.3mf").await {
            Err(AssetError::AuthFailed(msg)) => assert_eq!(msg, "530 Login incorrect."),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(server.await.unwrap(), vec!["USER bblp", "PASS wrong"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_connection_failure() {
        let (port, _server) = ftps_server(Vec::new()).await;
        let source = FtpsSource::new("127.0.0.1", port, "bblp", PASSWORD);

        match source.retrieve("cache/benchy.3mf").await {
            Err(AssetError::ConnectionFailed(msg)) => assert!(msg.starts_with("550")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
