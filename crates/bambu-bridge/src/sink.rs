//! Display sinks.

use std::path::Path;

use tracing::{info, warn};

use crate::config::{SinkBindings, SinkField};
use crate::format::{reorder_color, Vocabulary};
use crate::status::StatusSnapshot;

/// A display layer that shows text and images by element name.
///
/// Implementations must tolerate unknown names.
pub trait Sink: Send + Sync {
    /// Set the text of a named element.
    fn set_text(&self, target: &str, text: &str);

    /// Point a named image element at a local file.
    fn set_image(&self, target: &str, path: &Path);

    /// Set the color of a named element.
    fn set_color(&self, target: &str, color: u32);
}

/// Sink that only logs the updates it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn set_text(&self, target: &str, text: &str) {
        info!(target_name = target, text, "sink text");
    }

    fn set_image(&self, target: &str, path: &Path) {
        info!(target_name = target, path = %path.display(), "sink image");
    }

    fn set_color(&self, target: &str, color: u32) {
        info!(target_name = target, color = format_args!("{color:#010x}"), "sink color");
    }
}

/// Push a snapshot to every bound sink.
pub fn publish(snapshot: &StatusSnapshot, bindings: &SinkBindings, vocab: &Vocabulary, sink: &dyn Sink) {
    for field in SinkField::TEXT {
        let Some(target) = bindings.target(field) else {
            continue;
        };
        if let Some(text) = snapshot.text(field, vocab) {
            sink.set_text(target, &text);
        }
    }

    if let Some(target) = bindings.target(SinkField::FilamentColor) {
        match reorder_color(&snapshot.tray.tray_color) {
            Ok(color) => sink.set_color(target, color),
            Err(e) => warn!(error = %e, "skipping filament color update"),
        }
    }
}
