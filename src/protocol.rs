//! Wire protocol for the conversion service.
//!
//! Every control message travels in a length-prefixed frame so that message
//! boundaries never depend on how the transport happens to split reads:
//!
//! ```text
//! +---------------------+-------------------------------+
//! | payload_len (u32 BE)| payload (payload_len bytes)   |
//! +---------------------+-------------------------------+
//! ```
//!
//! A session on the wire:
//!
//! ```text
//! C -> S  frame("report.docx;12")
//! S -> C  frame("metadata_received")
//! C -> S  <12 raw bytes>
//! S -> C  frame("conversion_successful")
//! S -> C  <converted bytes until the server closes the connection>
//! ```
//!
//! Document bytes are not framed: the upload length comes from the metadata
//! and the download ends at end-of-stream.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the frame length header.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a control frame payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Acknowledgment sent once the metadata has been accepted.
pub const METADATA_ACK: &[u8] = b"metadata_received";

const SEPARATOR: char = ';';

/// Final outcome of a session, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    ConversionSuccessful,
    UnsupportedFileType,
    FileTransferError,
    ConversionFailed,
    ServerError,
}

impl Status {
    const ALL: [Status; 5] = [
        Status::ConversionSuccessful,
        Status::UnsupportedFileType,
        Status::FileTransferError,
        Status::ConversionFailed,
        Status::ServerError,
    ];

    /// The ASCII token sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::ConversionSuccessful => "conversion_successful",
            Status::UnsupportedFileType => "unsupported_file_type",
            Status::FileTransferError => "file_transfer_error",
            Status::ConversionFailed => "conversion_failed",
            Status::ServerError => "server_error",
        }
    }

    /// Parse a status token received from the server.
    pub fn parse(token: &[u8]) -> Option<Status> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().as_bytes() == token)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame-level read errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed before a complete frame was received")]
    UnexpectedEof,
    #[error("frame length {len} exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reasons a metadata payload is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("metadata is not valid UTF-8")]
    InvalidUtf8,
    #[error("missing ';' separator")]
    MissingSeparator,
    #[error("file name is empty")]
    EmptyName,
    #[error("file name {0:?} contains ';'")]
    SeparatorInName(String),
    #[error("invalid file size {0:?}")]
    InvalidSize(String),
}

/// The `<name>;<size>` handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub size: u64,
}

impl Metadata {
    /// Build a metadata message, validating the name.
    pub fn new(name: impl Into<String>, size: u64) -> Result<Self, MetadataError> {
        let name = name.into();
        if name.is_empty() {
            return Err(MetadataError::EmptyName);
        }
        if name.contains(SEPARATOR) {
            return Err(MetadataError::SeparatorInName(name));
        }
        Ok(Self { name, size })
    }

    /// Encode to the frame payload.
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("{}{}{}", self.name, SEPARATOR, self.size))
    }

    /// Decode a frame payload.
    ///
    /// Surrounding whitespace is ignored. The size must be a plain base-10
    /// literal (no sign).
    pub fn decode(payload: &[u8]) -> Result<Self, MetadataError> {
        let text = std::str::from_utf8(payload).map_err(|_| MetadataError::InvalidUtf8)?;
        let (name, size) = text
            .trim()
            .split_once(SEPARATOR)
            .ok_or(MetadataError::MissingSeparator)?;

        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MetadataError::InvalidSize(size.to_string()));
        }
        let size = size
            .parse()
            .map_err(|_| MetadataError::InvalidSize(size.to_string()))?;

        Self::new(name, size)
    }
}

/// Read one frame, accumulating across as many reads as the transport needs.
///
/// The length header is checked against `max_len` before any payload is read.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact_or_eof(reader, &mut header).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut payload = BytesMut::zeroed(len);
    read_exact_or_eof(reader, &mut payload).await?;
    Ok(payload.freeze())
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame payload too large"))?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u32(len);
    frame.extend_from_slice(payload);

    writer.write_all(&frame).await?;
    writer.flush().await
}

async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::UnexpectedEof),
        Err(e) => Err(FrameError::Io(e)),
    }
}
