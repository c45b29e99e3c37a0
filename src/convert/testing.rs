//! Test doubles for the conversion collaborators.

use super::{ConvertError, Converter, DocumentKind, FileTypeDetector};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Detector that reports the same answer for every file.
pub(crate) struct FixedDetector(pub Option<DocumentKind>);

impl FileTypeDetector for FixedDetector {
    fn detect(&self, _path: &Path) -> io::Result<Option<DocumentKind>> {
        Ok(self.0)
    }
}

/// Converter that writes `%PDF-fake <kind>\n` followed by the input bytes
/// next to the source file, and records every invocation.
pub(crate) struct FakeConverter {
    fail: bool,
    calls: Mutex<Vec<DocumentKind>>,
}

impl FakeConverter {
    pub fn succeeding() -> Self {
        Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<DocumentKind> {
        self.calls.lock().unwrap().clone()
    }

    fn convert(&self, kind: DocumentKind, source: &Path) -> Result<PathBuf, ConvertError> {
        self.calls.lock().unwrap().push(kind);
        if self.fail {
            return Err(ConvertError::Other(format!("cannot parse {}", source.display())));
        }

        let input = std::fs::read(source).map_err(|e| ConvertError::Other(e.to_string()))?;
        let mut output = format!("%PDF-fake {kind}\n").into_bytes();
        output.extend_from_slice(&input);

        let stem = source.file_stem().unwrap_or_default().to_string_lossy();
        let produced = source.with_file_name(format!("{stem}.pdf"));
        std::fs::write(&produced, output).map_err(|e| ConvertError::Other(e.to_string()))?;
        Ok(produced)
    }
}

impl Converter for FakeConverter {
    fn convert_word_to_pdf(&self, source: &Path) -> Result<PathBuf, ConvertError> {
        self.convert(DocumentKind::WordProcessing, source)
    }

    fn convert_excel_to_pdf(&self, source: &Path) -> Result<PathBuf, ConvertError> {
        self.convert(DocumentKind::Spreadsheet, source)
    }

    fn convert_ppt_to_pdf(&self, source: &Path) -> Result<PathBuf, ConvertError> {
        self.convert(DocumentKind::Presentation, source)
    }
}
