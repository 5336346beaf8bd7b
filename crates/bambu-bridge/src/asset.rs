//! Model preview retrieval.
//!
//! When a new job starts the printer keeps the sliced project as a `.3mf`
//! container on its storage. The preview image for the printed plate lives
//! under `Metadata/` inside that container. The fetcher downloads the
//! container, extracts the image, stores it below the image root and points
//! the model sink at it.

use std::future::Future;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::info;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::AssetError;
use crate::sink::Sink;
use crate::tray::text_field;

/// Directory inside the container holding plate previews.
const METADATA_DIR: &str = "Metadata";

/// Subdirectory of the image root receiving model previews.
const MODEL_DIR: &str = "model";

/// What to fetch for a newly started job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFetchRequest {
    /// Job subtask name (the project name).
    pub subtask_name: String,
    /// Operation mode, `"cloud"` or `"local"`.
    pub print_type: String,
    /// Path of the gcode file being printed, e.g. `/data/Metadata/plate_1.gcode`.
    pub gcode_file: String,
}

impl AssetFetchRequest {
    /// Build a request from a `print` status node.
    ///
    /// Returns `None` when the subtask name or gcode file is missing.
    pub fn from_print(print: &Value) -> Option<Self> {
        let subtask_name = text_field(print, "subtask_name").filter(|s| !s.is_empty())?;
        let gcode_file = text_field(print, "gcode_file").filter(|s| !s.is_empty())?;
        Some(Self {
            subtask_name,
            print_type: text_field(print, "print_type").unwrap_or_default(),
            gcode_file,
        })
    }

    /// Remote path of the project container.
    pub fn archive_path(&self) -> String {
        if self.print_type == "cloud" {
            format!("cache/{}.3mf", self.subtask_name)
        } else {
            format!("{}.gcode.3mf", self.subtask_name)
        }
    }

    /// File name of the preview image, e.g. `plate_1.png`.
    pub fn image_name(&self) -> String {
        let base = self.gcode_file.rsplit('/').next().unwrap_or_default();
        let stem = Path::new(base)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{stem}.png")
    }
}

/// Remote storage that can hand out a file by path.
pub trait ArchiveSource: Send + Sync {
    /// Download a file completely.
    fn retrieve(&self, path: &str) -> impl Future<Output = Result<Vec<u8>, AssetError>> + Send;
}

impl<S: ArchiveSource> ArchiveSource for Arc<S> {
    async fn retrieve(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        self.as_ref().retrieve(path).await
    }
}

/// Downloads model previews and hands them to the model sink.
pub struct AssetFetcher<A> {
    source: A,
    image_root: PathBuf,
    timeout: Duration,
    sink: Arc<dyn Sink>,
    target: String,
}

impl<A: ArchiveSource> AssetFetcher<A> {
    /// Create a fetcher writing below `image_root` and notifying `target`.
    pub fn new(
        source: A,
        image_root: impl Into<PathBuf>,
        timeout: Duration,
        sink: Arc<dyn Sink>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source,
            image_root: image_root.into(),
            timeout,
            sink,
            target: target.into(),
        }
    }

    /// Fetch the preview for `request`, store it and update the model sink.
    ///
    /// Makes a single attempt bounded by the configured timeout.
    pub async fn fetch(&self, request: &AssetFetchRequest) -> Result<PathBuf, AssetError> {
        let archive_path = request.archive_path();
        let image_name = request.image_name();
        info!(archive = %archive_path, image = %image_name, "loading model image");

        let bytes = tokio::time::timeout(self.timeout, self.source.retrieve(&archive_path))
            .await
            .map_err(|_| {
                AssetError::ConnectionFailed(format!("transfer timed out after {:?}", self.timeout))
            })??;

        let image = extract_entry(&bytes, &image_name)?;

        let directory = self.image_root.join(MODEL_DIR);
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(AssetError::WriteFailed)?;
        let path = directory.join(&image_name);
        tokio::fs::write(&path, &image)
            .await
            .map_err(AssetError::WriteFailed)?;

        self.sink.set_image(&self.target, &path);
        Ok(path)
    }
}

/// Read `Metadata/{image_name}` out of a zip container.
pub fn extract_entry(archive: &[u8], image_name: &str) -> Result<Vec<u8>, AssetError> {
    let mut archive =
        ZipArchive::new(Cursor::new(archive)).map_err(|_| AssetError::NotAFileArchive)?;

    let entry_name = format!("{METADATA_DIR}/{image_name}");
    let mut entry = match archive.by_name(&entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(AssetError::EntryNotFound(entry_name)),
        Err(_) => return Err(AssetError::NotAFileArchive),
    };

    let mut data = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|_| AssetError::NotAFileArchive)?;
    Ok(data)
}
