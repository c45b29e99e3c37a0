//! Conversion dispatch.
//!
//! The dispatcher asks a [`FileTypeDetector`] what an uploaded file is, hands
//! it to the matching [`Converter`] method, and moves the result into the
//! server's output directory.
//!
//! ## Collaborators
//! - `detect`: content sniffing with an extension fallback for containers
//! - `office`: conversion by an external office suite running headless
//!
//! Both collaborators block, so the dispatcher runs them on tokio's blocking
//! pool.

pub mod detect;
pub mod office;

#[cfg(test)]
pub(crate) mod testing;

pub use detect::{FileTypeDetector, SniffingDetector};
pub use office::OfficeConverter;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// The closed set of document kinds the service converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    WordProcessing,
    Spreadsheet,
    Presentation,
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DocumentKind::WordProcessing => "word",
            DocumentKind::Spreadsheet => "excel",
            DocumentKind::Presentation => "powerpoint",
        })
    }
}

/// Failure reported by a converter.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("converter exited with {status}: {stderr}")]
    Exited { status: ExitStatus, stderr: String },
    #[error("converter reported success but {0} does not exist")]
    MissingOutput(PathBuf),
    #[error("conversion workspace error: {0}")]
    Workspace(#[source] io::Error),
    #[error("{0}")]
    Other(String),
}

/// A document conversion backend.
///
/// Each method takes the uploaded file and returns the path of the file it
/// produced.
pub trait Converter: Send + Sync {
    fn convert_word_to_pdf(&self, source: &Path) -> Result<PathBuf, ConvertError>;
    fn convert_excel_to_pdf(&self, source: &Path) -> Result<PathBuf, ConvertError>;
    fn convert_ppt_to_pdf(&self, source: &Path) -> Result<PathBuf, ConvertError>;
}

/// Errors surfaced to the session by [`Dispatcher::dispatch`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unsupported file type")]
    UnsupportedFileType,
    #[error("conversion failed: {0}")]
    ConversionFailed(#[source] ConvertError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Routes uploaded files to a converter and collects the output.
#[derive(Clone)]
pub struct Dispatcher {
    detector: Arc<dyn FileTypeDetector>,
    converter: Arc<dyn Converter>,
    output_dir: PathBuf,
}

impl Dispatcher {
    pub fn new(
        detector: Arc<dyn FileTypeDetector>,
        converter: Arc<dyn Converter>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            detector,
            converter,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Detect, convert, and relocate. Returns the final output path.
    pub async fn dispatch(&self, source: &Path, session_id: &str) -> Result<PathBuf, DispatchError> {
        let detector = Arc::clone(&self.detector);
        let path = source.to_path_buf();
        let kind = tokio::task::spawn_blocking(move || detector.detect(&path))
            .await
            .map_err(io::Error::other)??
            .ok_or(DispatchError::UnsupportedFileType)?;
        info!(%kind, "Detected file type");

        let converter = Arc::clone(&self.converter);
        let path = source.to_path_buf();
        let produced = tokio::task::spawn_blocking(move || match kind {
            DocumentKind::WordProcessing => converter.convert_word_to_pdf(&path),
            DocumentKind::Spreadsheet => converter.convert_excel_to_pdf(&path),
            DocumentKind::Presentation => converter.convert_ppt_to_pdf(&path),
        })
        .await
        .map_err(io::Error::other)?
        .map_err(DispatchError::ConversionFailed)?;
        debug!(produced = %produced.display(), "Converter finished");

        Ok(relocate(&produced, &self.output_dir, session_id).await?)
    }
}

/// Move a converter output into `output_dir`, namespaced by the session id.
async fn relocate(produced: &Path, output_dir: &Path, session_id: &str) -> io::Result<PathBuf> {
    let file_name = produced
        .file_name()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("converter output {} has no file name", produced.display()),
            )
        })?
        .to_string_lossy();

    let file_name = if file_name.starts_with(session_id) {
        file_name.into_owned()
    } else {
        format!("{session_id}_{file_name}")
    };
    let destination = output_dir.join(file_name);

    if let Err(rename_err) = tokio::fs::rename(produced, &destination).await {
        // rename cannot cross filesystems; fall back to copy and unlink.
        if tokio::fs::copy(produced, &destination).await.is_err() {
            return Err(rename_err);
        }
        tokio::fs::remove_file(produced).await?;
    }

    Ok(destination)
}
