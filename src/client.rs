//! Client side of the conversion protocol.
//!
//! Uploads one document per connection and saves whatever the server streams
//! back after `conversion_successful`.

use crate::protocol::{
    read_frame, write_frame, FrameError, Metadata, MetadataError, Status, DEFAULT_MAX_FRAME_LEN,
    METADATA_ACK,
};
use crate::transfer::{Streamer, TransferError};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Directory the client saves converted files into by default.
pub const DEFAULT_OUTPUT_DIR: &str = "converted_files";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{} is empty, nothing to send", .0.display())]
    EmptyFile(PathBuf),
    #[error("invalid file name: {0}")]
    InvalidName(#[from] MetadataError),
    #[error("server did not acknowledge the metadata")]
    HandshakeRejected,
    #[error("server reported {0}")]
    Rejected(Status),
    #[error("unrecognized status token {0:?}")]
    UnknownStatus(String),
    #[error("upload failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("protocol error: {0}")]
    Frame(#[from] FrameError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// `converted_files/converted_<name>.pdf`
pub fn default_output_path(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Path::new(DEFAULT_OUTPUT_DIR).join(format!("converted_{name}.pdf"))
}

/// Upload `path` to the server at `addr` and write the converted result to
/// `output`. Returns the number of converted bytes received.
pub async fn send_file(addr: &str, path: &Path, output: &Path) -> Result<u64, ClientError> {
    let size = tokio::fs::metadata(path).await?.len();
    if size == 0 {
        return Err(ClientError::EmptyFile(path.to_path_buf()));
    }
    let name = path
        .file_name()
        .ok_or(MetadataError::EmptyName)?
        .to_str()
        .ok_or(MetadataError::InvalidUtf8)?;
    let metadata = Metadata::new(name, size)?;

    let mut stream = TcpStream::connect(addr).await?;
    info!(server = %addr, name = %metadata.name, size, "Connected");

    write_frame(&mut stream, &metadata.encode()).await?;
    let ack = match read_frame(&mut stream, DEFAULT_MAX_FRAME_LEN).await {
        Ok(ack) => ack,
        Err(FrameError::UnexpectedEof) => return Err(ClientError::HandshakeRejected),
        Err(e) => return Err(e.into()),
    };
    if &ack[..] != METADATA_ACK {
        return Err(ClientError::HandshakeRejected);
    }
    debug!("Metadata acknowledged");

    let mut file = File::open(path).await?;
    let sent = Streamer::default().send_all(&mut file, &mut stream).await?;
    debug!(bytes = sent, "Upload complete");

    let token = read_frame(&mut stream, DEFAULT_MAX_FRAME_LEN).await?;
    match Status::parse(&token) {
        Some(Status::ConversionSuccessful) => {}
        Some(status) => return Err(ClientError::Rejected(status)),
        None => {
            return Err(ClientError::UnknownStatus(
                String::from_utf8_lossy(&token).into_owned(),
            ))
        }
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut converted = File::create(output).await?;
    let received = tokio::io::copy(&mut stream, &mut converted).await?;
    converted.flush().await?;
    info!(output = %output.display(), bytes = received, "Converted file saved");

    Ok(received)
}
