//! File type detection.
//!
//! Content is sniffed first. Office documents are zip (OOXML, OpenDocument)
//! or OLE compound files (legacy binary formats); when the sniffer only sees
//! the container, the file extension decides.

use super::DocumentKind;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes read from the head of a file for sniffing.
const SNIFF_LEN: usize = 8192;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Decides what kind of document a file holds.
pub trait FileTypeDetector: Send + Sync {
    /// Returns `None` for anything outside the supported kinds.
    fn detect(&self, path: &Path) -> io::Result<Option<DocumentKind>>;
}

/// Magic-number detector backed by `infer`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SniffingDetector;

impl FileTypeDetector for SniffingDetector {
    fn detect(&self, path: &Path) -> io::Result<Option<DocumentKind>> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;

        if let Some(kind) = infer::get(&head).and_then(|t| kind_from_mime(t.mime_type())) {
            return Ok(Some(kind));
        }

        if head.starts_with(ZIP_MAGIC) || head.starts_with(OLE_MAGIC) {
            return Ok(path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(kind_from_extension));
        }

        Ok(None)
    }
}

fn kind_from_mime(mime: &str) -> Option<DocumentKind> {
    match mime {
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/msword"
        | "application/vnd.oasis.opendocument.text" => Some(DocumentKind::WordProcessing),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.ms-excel"
        | "application/vnd.oasis.opendocument.spreadsheet" => Some(DocumentKind::Spreadsheet),
        "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        | "application/vnd.ms-powerpoint"
        | "application/vnd.oasis.opendocument.presentation" => Some(DocumentKind::Presentation),
        _ => None,
    }
}

fn kind_from_extension(ext: &str) -> Option<DocumentKind> {
    match ext.to_ascii_lowercase().as_str() {
        "docx" | "doc" | "odt" => Some(DocumentKind::WordProcessing),
        "xlsx" | "xls" | "ods" => Some(DocumentKind::Spreadsheet),
        "pptx" | "ppt" | "odp" => Some(DocumentKind::Presentation),
        _ => None,
    }
}
