#![warn(missing_docs)]

//! Telemetry bridge from a Bambu Lab printer to display sinks.
//!
//! This crate provides:
//! - MQTT-over-TLS connection to the printer's report topic, with reconnect
//!   and credential rejection handling
//! - Decoding of `print` status reports into display-ready text
//! - AMS tray and nozzle resolution
//! - Model preview retrieval from the printer's FTPS storage
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bambu_bridge::{SessionConfig, SessionController, SinkField, TracingSink};
//!
//! bambu_bridge::logging::init("bambu_bridge=info")?;
//!
//! let mut config = SessionConfig::new("192.168.1.20", "12345678", "01S00A000000000");
//! config.sinks = config.sinks.with(SinkField::Layer, "Layer text");
//!
//! let controller = SessionController::new(Arc::new(TracingSink));
//! controller.start(config).await?;
//! // ...
//! controller.stop().await;
//! ```

pub mod asset;
pub mod config;
pub mod error;
pub mod format;
pub mod ftps;
pub mod logging;
pub mod mqtt;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod status;
pub mod tls;
pub mod tray;

pub use asset::{ArchiveSource, AssetFetchRequest, AssetFetcher};
pub use config::{SessionConfig, SinkBindings, SinkField};
pub use error::{AssetError, BridgeError, Result};
pub use format::Vocabulary;
pub use ftps::FtpsSource;
pub use mqtt::{ConnectionManager, ConnectionState, MessageHandler};
pub use pipeline::StatusPipeline;
pub use session::SessionController;
pub use sink::{Sink, TracingSink};
pub use status::{StatusDecoder, StatusSnapshot};
pub use tray::TrayAttributes;
