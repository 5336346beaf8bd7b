//! Per-message processing: decode, fetch the model image on job change,
//! publish to the sinks.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::asset::{ArchiveSource, AssetFetcher};
use crate::config::SinkBindings;
use crate::format::Vocabulary;
use crate::mqtt::MessageHandler;
use crate::sink::{publish, Sink};
use crate::status::StatusDecoder;

/// Message handler joining the decoder, the asset fetcher and the sinks.
pub struct StatusPipeline<A> {
    decoder: StatusDecoder,
    fetcher: Option<AssetFetcher<A>>,
    bindings: SinkBindings,
    vocabulary: Vocabulary,
    sink: Arc<dyn Sink>,
}

impl<A: ArchiveSource> StatusPipeline<A> {
    /// Create a pipeline. Without a fetcher no model images are requested.
    pub fn new(
        fetcher: Option<AssetFetcher<A>>,
        bindings: SinkBindings,
        vocabulary: Vocabulary,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            decoder: StatusDecoder::new(fetcher.is_some()),
            fetcher,
            bindings,
            vocabulary,
            sink,
        }
    }

    /// Job identifier of the last decoded report.
    pub fn last_job_id(&self) -> &str {
        self.decoder.last_job_id()
    }
}

impl<A: ArchiveSource> MessageHandler for StatusPipeline<A> {
    async fn handle(&mut self, payload: &[u8]) {
        let decoded = match self.decoder.decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(error = %e, "dropping payload");
                return;
            }
        };

        if let (Some(request), Some(fetcher)) = (&decoded.fetch, &self.fetcher) {
            if let Err(e) = fetcher.fetch(request).await {
                warn!(error = %e, job = %decoded.snapshot.job_id, "model image not updated");
            }
        }

        publish(&decoded.snapshot, &self.bindings, &self.vocabulary, self.sink.as_ref());
    }
}
