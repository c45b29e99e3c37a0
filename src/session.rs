//! One client's upload, convert, download exchange.
//!
//! A [`Session`] owns its connection from accept to close and walks a fixed
//! sequence of states:
//!
//! ```text
//! AwaitingMetadata -> ReceivingFile -> Converting -> SendingResult -> Closed
//!        \                 \               \              \
//!         +-----------------+---------------+--------------+--> Failed
//! ```
//!
//! Every failure is handled inside the session: the client gets at most one
//! status token and the connection is always closed.

use crate::config::Config;
use crate::convert::{ConvertError, DispatchError, Dispatcher};
use crate::protocol::{self, FrameError, Metadata, Status, METADATA_ACK};
use crate::transfer::{timed_out, with_timeout, Streamer, TransferError, CHUNK_SIZE};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest file name component the upload and output directories accept.
const MAX_COMPONENT_LEN: usize = 255;

/// Room kept for a converter suffix such as `.converted.<format>`.
const OUTPUT_SUFFIX_RESERVE: usize = 24;

/// Tracing target for per-phase timings.
const PERF_TARGET: &str = "convertd::perf";

/// Limits and locations every session works with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub upload_dir: PathBuf,
    pub max_file_size: u64,
    pub max_frame_len: usize,
    pub io_timeout: Option<Duration>,
    pub session_timeout: Option<Duration>,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            max_file_size: config.max_file_size,
            max_frame_len: config.max_frame_len,
            io_timeout: config.io_timeout,
            session_timeout: config.session_timeout,
        }
    }
}

/// Immutable state shared by all sessions.
pub struct SessionContext {
    pub settings: SessionSettings,
    pub dispatcher: Dispatcher,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingMetadata,
    ReceivingFile,
    Converting,
    SendingResult,
    Closed,
    Failed,
}

impl SessionState {
    /// Successor on the success path.
    fn next(self) -> Option<SessionState> {
        match self {
            SessionState::AwaitingMetadata => Some(SessionState::ReceivingFile),
            SessionState::ReceivingFile => Some(SessionState::Converting),
            SessionState::Converting => Some(SessionState::SendingResult),
            SessionState::SendingResult => Some(SessionState::Closed),
            SessionState::Closed | SessionState::Failed => None,
        }
    }

    #[cfg(test)]
    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

/// Why a session ended in [`SessionState::Failed`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),
    #[error("incomplete transfer: expected {expected} bytes, received {received}")]
    IncompleteTransfer { expected: u64, received: u64 },
    #[error("unsupported file type")]
    UnsupportedFileType,
    #[error("conversion failed: {0}")]
    ConversionFailed(#[source] ConvertError),
    #[error("failed to send result: {0}")]
    TransferWriteError(#[source] io::Error),
    #[error("internal server error: {0}")]
    ServerInternalError(#[source] io::Error),
}

impl SessionError {
    /// Status token reported to the client, if any.
    ///
    /// Malformed metadata closes silently because nothing has been
    /// acknowledged yet; a failed result transfer has already sent
    /// `conversion_successful`.
    pub fn status(&self) -> Option<Status> {
        match self {
            SessionError::MalformedMetadata(_) | SessionError::TransferWriteError(_) => None,
            SessionError::IncompleteTransfer { .. } => Some(Status::FileTransferError),
            SessionError::UnsupportedFileType => Some(Status::UnsupportedFileType),
            SessionError::ConversionFailed(_) => Some(Status::ConversionFailed),
            SessionError::ServerInternalError(_) => Some(Status::ServerError),
        }
    }
}

impl From<DispatchError> for SessionError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnsupportedFileType => SessionError::UnsupportedFileType,
            DispatchError::ConversionFailed(e) => SessionError::ConversionFailed(e),
            DispatchError::Io(e) => SessionError::ServerInternalError(e),
        }
    }
}

/// State of one client connection.
pub struct Session {
    id: String,
    peer: SocketAddr,
    state: SessionState,
    declared_name: Option<String>,
    declared_size: u64,
    bytes_received: u64,
    source_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    status_sent: bool,
    context: Arc<SessionContext>,
}

impl Session {
    pub fn new(peer: SocketAddr, context: Arc<SessionContext>) -> Self {
        Self {
            id: session_id(peer),
            peer,
            state: SessionState::AwaitingMetadata,
            declared_name: None,
            declared_size: 0,
            bytes_received: 0,
            source_path: None,
            output_path: None,
            status_sent: false,
            context,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn declared_name(&self) -> Option<&str> {
        self.declared_name.as_deref()
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Serve the connection to completion, then close it.
    ///
    /// The stream is consumed: it is shut down and dropped before this returns,
    /// whatever the outcome.
    pub async fn run<S>(&mut self, mut stream: S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!(peer = %self.peer, "Session started");

        let session_timeout = self.context.settings.session_timeout;
        let result = match session_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.drive(&mut stream)).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::ServerInternalError(timed_out(limit))),
            },
            None => self.drive(&mut stream).await,
        };

        if let Err(ref error) = result {
            self.fail(&mut stream, error).await;
        }

        if let Err(e) = with_timeout(self.context.settings.io_timeout, stream.shutdown()).await {
            debug!(error = %e, "Shutdown failed");
        }
        drop(stream);
        info!(
            state = ?self.state,
            bytes_received = self.bytes_received,
            "Connection closed"
        );
        result
    }

    async fn drive<S>(&mut self, stream: &mut S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let context = Arc::clone(&self.context);
        let settings = &context.settings;
        let streamer = Streamer::new(CHUNK_SIZE, settings.io_timeout);

        // Metadata handshake
        let started = Instant::now();
        let metadata = self.receive_metadata(stream).await?;
        with_timeout(settings.io_timeout, protocol::write_frame(stream, METADATA_ACK))
            .await
            .map_err(SessionError::ServerInternalError)?;
        info!(name = %metadata.name, size = metadata.size, "Metadata acknowledged");
        record_phase("metadata", started);

        let Metadata { name, size } = metadata;
        let source_path = settings.upload_dir.join(format!("{}_{}", self.id, name));
        self.declared_name = Some(name);
        self.declared_size = size;
        self.source_path = Some(source_path.clone());
        self.advance(SessionState::ReceivingFile);

        // Upload
        let started = Instant::now();
        let mut file = File::create(&source_path)
            .await
            .map_err(SessionError::ServerInternalError)?;
        let outcome = streamer.receive_exactly(stream, &mut file, size).await;
        let received = match outcome {
            Ok(received) => received,
            Err(TransferError::Read(e)) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(SessionError::ServerInternalError(e));
            }
            Err(TransferError::Read(e)) => {
                debug!(error = %e, "Connection failed during upload");
                let _ = file.flush().await;
                file.metadata().await.map(|m| m.len()).unwrap_or(0)
            }
            Err(TransferError::Write(e)) => return Err(SessionError::ServerInternalError(e)),
        };
        drop(file);
        self.bytes_received = received;
        if received != size {
            return Err(SessionError::IncompleteTransfer {
                expected: size,
                received,
            });
        }
        debug!(path = %source_path.display(), bytes = received, "Upload complete");
        record_phase("transfer", started);
        self.advance(SessionState::Converting);

        // Conversion
        let started = Instant::now();
        let output_path = context.dispatcher.dispatch(&source_path, &self.id).await?;
        self.output_path = Some(output_path.clone());
        record_phase("conversion", started);

        // Response
        let started = Instant::now();
        let mut output = File::open(&output_path)
            .await
            .map_err(SessionError::ServerInternalError)?;
        self.advance(SessionState::SendingResult);
        self.send_status(stream, Status::ConversionSuccessful)
            .await
            .map_err(SessionError::TransferWriteError)?;
        let sent = streamer
            .send_all(&mut output, stream)
            .await
            .map_err(|e| match e {
                TransferError::Read(e) => SessionError::ServerInternalError(e),
                TransferError::Write(e) => SessionError::TransferWriteError(e),
            })?;
        info!(output = %output_path.display(), bytes = sent, "Converted file sent");
        record_phase("response", started);

        self.advance(SessionState::Closed);
        Ok(())
    }

    /// Read, decode, and vet the metadata frame.
    async fn receive_metadata<S>(&self, stream: &mut S) -> Result<Metadata, SessionError>
    where
        S: AsyncRead + Unpin,
    {
        let settings = &self.context.settings;
        let payload = with_timeout(
            settings.io_timeout,
            protocol::read_frame(stream, settings.max_frame_len),
        )
        .await
        .map_err(|e| match e {
            FrameError::Io(e) if e.kind() == io::ErrorKind::TimedOut => {
                SessionError::ServerInternalError(e)
            }
            other => SessionError::MalformedMetadata(other.to_string()),
        })?;

        let metadata = Metadata::decode(&payload)
            .map_err(|e| SessionError::MalformedMetadata(e.to_string()))?;

        if metadata.size == 0 {
            return Err(SessionError::MalformedMetadata(
                "declared size is zero".to_string(),
            ));
        }
        if metadata.size > settings.max_file_size {
            return Err(SessionError::MalformedMetadata(format!(
                "declared size {} exceeds limit of {} bytes",
                metadata.size, settings.max_file_size
            )));
        }
        check_file_name(&metadata.name, &self.id).map_err(SessionError::MalformedMetadata)?;

        Ok(metadata)
    }

    async fn send_status<S>(&mut self, stream: &mut S, status: Status) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        self.status_sent = true;
        with_timeout(
            self.context.settings.io_timeout,
            protocol::write_frame(stream, status.as_str().as_bytes()),
        )
        .await
    }

    async fn fail<S>(&mut self, stream: &mut S, error: &SessionError)
    where
        S: AsyncWrite + Unpin,
    {
        let from = self.state;
        self.state = SessionState::Failed;

        match error {
            SessionError::MalformedMetadata(_) => info!(%error, "Rejected connection"),
            _ => warn!(state = ?from, %error, "Session failed"),
        }

        if self.status_sent {
            return;
        }
        if let Some(status) = error.status() {
            if let Err(e) = self.send_status(stream, status).await {
                debug!(%status, error = %e, "Could not deliver status token");
            }
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert_eq!(self.state.next(), Some(next));
        debug!(from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }
}

/// `<ip>_<port>_<uuid>`, safe to embed in a file name.
fn session_id(peer: SocketAddr) -> String {
    let ip = peer.ip().to_string().replace([':', '%'], "-");
    format!("{}_{}_{}", ip, peer.port(), Uuid::new_v4())
}

/// Reject names that could escape the upload directory, or that would not
/// fit in one path component once stored as `<id>_<name>` and converted.
fn check_file_name(name: &str, id: &str) -> Result<(), String> {
    let limit = MAX_COMPONENT_LEN.saturating_sub(id.len() + 1 + OUTPUT_SUFFIX_RESERVE);
    if name.len() > limit {
        return Err(format!("file name longer than {limit} bytes"));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(format!("unsafe file name {name:?}"));
    }
    Ok(())
}

fn record_phase(phase: &'static str, started: Instant) {
    info!(
        target: PERF_TARGET,
        phase,
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "Phase complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::testing::{FakeConverter, FixedDetector};
    use crate::convert::DocumentKind;
    use crate::protocol::{read_frame, write_frame, DEFAULT_MAX_FRAME_LEN};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::task::JoinHandle;

    struct Harness {
        dir: TempDir,
        converter: Arc<FakeConverter>,
        settings: SessionSettings,
        kind: Option<DocumentKind>,
    }

    impl Harness {
        fn new(kind: Option<DocumentKind>) -> Self {
            Self::with_converter(kind, FakeConverter::succeeding())
        }

        fn with_converter(kind: Option<DocumentKind>, converter: FakeConverter) -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir(dir.path().join("uploads")).unwrap();
            std::fs::create_dir(dir.path().join("out")).unwrap();
            let settings = SessionSettings {
                upload_dir: dir.path().join("uploads"),
                max_file_size: 1024 * 1024,
                max_frame_len: DEFAULT_MAX_FRAME_LEN,
                io_timeout: None,
                session_timeout: None,
            };
            Self {
                dir,
                converter: Arc::new(converter),
                settings,
                kind,
            }
        }

        fn context(&self) -> Arc<SessionContext> {
            Arc::new(SessionContext {
                settings: self.settings.clone(),
                dispatcher: Dispatcher::new(
                    Arc::new(FixedDetector(self.kind)),
                    self.converter.clone(),
                    self.dir.path().join("out"),
                ),
            })
        }

        fn start(&self) -> (DuplexStream, JoinHandle<(Session, Result<(), SessionError>)>) {
            self.start_from("127.0.0.1:50000")
        }

        fn start_from(
            &self,
            peer: &str,
        ) -> (DuplexStream, JoinHandle<(Session, Result<(), SessionError>)>) {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let mut session = Session::new(peer.parse().unwrap(), self.context());
            let handle = tokio::spawn(async move {
                let result = session.run(server).await;
                (session, result)
            });
            (client, handle)
        }

        fn uploads(&self) -> usize {
            std::fs::read_dir(self.dir.path().join("uploads")).unwrap().count()
        }
    }

    async fn read_to_end(client: &mut DuplexStream) -> Vec<u8> {
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        rest
    }

    async fn expect_status(client: &mut DuplexStream, status: Status) {
        let token = read_frame(client, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert_eq!(Status::parse(&token), Some(status));
    }

    async fn handshake(client: &mut DuplexStream, metadata: &[u8]) {
        write_frame(client, metadata).await.unwrap();
        let ack = read_frame(client, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert_eq!(&ack[..], METADATA_ACK);
    }

    #[tokio::test]
    async fn test_successful_round_trip() {
        let harness = Harness::new(Some(DocumentKind::WordProcessing));
        let (mut client, handle) = harness.start();

        handshake(&mut client, b"report.docx;12").await;
        client.write_all(b"hello world!").await.unwrap();
        expect_status(&mut client, Status::ConversionSuccessful).await;
        assert_eq!(read_to_end(&mut client).await, b"%PDF-fake word\nhello world!");

        let (session, result) = handle.await.unwrap();
        result.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.declared_name(), Some("report.docx"));
        assert_eq!(session.declared_size(), 12);
        assert_eq!(session.bytes_received(), 12);

        let source = session.source_path().unwrap();
        assert_eq!(
            source,
            harness
                .dir
                .path()
                .join("uploads")
                .join(format!("{}_report.docx", session.id()))
        );
        assert_eq!(std::fs::read(source).unwrap(), b"hello world!");

        let output = session.output_path().unwrap();
        assert!(output.starts_with(harness.dir.path().join("out")));
        assert!(output
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(session.id()));
        assert_eq!(harness.converter.calls(), vec![DocumentKind::WordProcessing]);
    }

    #[tokio::test]
    async fn test_upload_split_into_many_writes() {
        let harness = Harness::new(Some(DocumentKind::Spreadsheet));
        let (mut client, handle) = harness.start();

        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 7) as u8).collect();
        handshake(&mut client, b"big.xlsx;10000").await;
        for piece in body.chunks(333) {
            client.write_all(piece).await.unwrap();
        }
        expect_status(&mut client, Status::ConversionSuccessful).await;
        let converted = read_to_end(&mut client).await;
        assert_eq!(&converted[b"%PDF-fake excel\n".len()..], &body[..]);

        let (session, result) = handle.await.unwrap();
        result.unwrap();
        assert_eq!(session.bytes_received(), 10_000);
    }

    #[tokio::test]
    async fn test_missing_separator_closes_silently() {
        let harness = Harness::new(Some(DocumentKind::WordProcessing));
        let (mut client, handle) = harness.start();

        write_frame(&mut client, b"report.docx12").await.unwrap();
        assert!(read_to_end(&mut client).await.is_empty());

        let (session, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::MalformedMetadata(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(harness.uploads(), 0);
    }

    #[tokio::test]
    async fn test_zero_size_rejected_before_receive() {
        let harness = Harness::new(Some(DocumentKind::Spreadsheet));
        let (mut client, handle) = harness.start();

        write_frame(&mut client, b"sheet.xlsx;0").await.unwrap();
        assert!(read_to_end(&mut client).await.is_empty());

        let (session, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::MalformedMetadata(_))));
        assert_eq!(session.source_path(), None);
        assert_eq!(harness.uploads(), 0);
        assert!(harness.converter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_declaration_rejected() {
        let harness = Harness::new(Some(DocumentKind::WordProcessing));
        let (mut client, handle) = harness.start();

        write_frame(&mut client, b"huge.docx;1048577").await.unwrap();
        assert!(read_to_end(&mut client).await.is_empty());

        let (_, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::MalformedMetadata(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        for metadata in [&b"../escape.docx;3"[..], b"..;3", b"dir\\file.docx;3"] {
            let harness = Harness::new(Some(DocumentKind::WordProcessing));
            let (mut client, handle) = harness.start();

            write_frame(&mut client, metadata).await.unwrap();
            assert!(read_to_end(&mut client).await.is_empty());

            let (_, result) = handle.await.unwrap();
            assert!(matches!(result, Err(SessionError::MalformedMetadata(_))));
            assert_eq!(harness.uploads(), 0);
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let harness = Harness::new(Some(DocumentKind::WordProcessing));
        let (mut client, handle) = harness.start();

        client.write_all(&[0, 1, 0, 0]).await.unwrap();
        assert!(read_to_end(&mut client).await.is_empty());

        let (_, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::MalformedMetadata(_))));
    }

    #[tokio::test]
    async fn test_client_closes_before_metadata() {
        let harness = Harness::new(Some(DocumentKind::WordProcessing));
        let (client, handle) = harness.start();
        drop(client);

        let (session, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::MalformedMetadata(_))));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_short_upload_reports_transfer_error() {
        let harness = Harness::new(Some(DocumentKind::WordProcessing));
        let (mut client, handle) = harness.start();

        handshake(&mut client, b"report.docx;10").await;
        client.write_all(b"hello").await.unwrap();
        client.shutdown().await.unwrap();

        expect_status(&mut client, Status::FileTransferError).await;
        assert!(read_to_end(&mut client).await.is_empty());

        let (session, result) = handle.await.unwrap();
        match result {
            Err(SessionError::IncompleteTransfer { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 5);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.bytes_received(), 5);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(harness.converter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_type_skips_converter() {
        let harness = Harness::new(None);
        let (mut client, handle) = harness.start();

        handshake(&mut client, b"notes.txt;4").await;
        client.write_all(b"text").await.unwrap();
        expect_status(&mut client, Status::UnsupportedFileType).await;
        assert!(read_to_end(&mut client).await.is_empty());

        let (session, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::UnsupportedFileType)));
        assert_eq!(session.output_path(), None);
        assert!(harness.converter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_conversion_failure() {
        let harness = Harness::with_converter(
            Some(DocumentKind::Presentation),
            FakeConverter::failing(),
        );
        let (mut client, handle) = harness.start();

        handshake(&mut client, b"deck.pptx;4").await;
        client.write_all(b"junk").await.unwrap();
        expect_status(&mut client, Status::ConversionFailed).await;
        assert!(read_to_end(&mut client).await.is_empty());

        let (_, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::ConversionFailed(_))));
        assert_eq!(harness.converter.calls(), vec![DocumentKind::Presentation]);
    }

    #[tokio::test]
    async fn test_session_deadline_reports_server_error() {
        let mut harness = Harness::new(Some(DocumentKind::WordProcessing));
        harness.settings.session_timeout = Some(Duration::from_millis(100));
        let (mut client, handle) = harness.start();

        // Send nothing; the deadline fires while waiting for metadata.
        expect_status(&mut client, Status::ServerError).await;
        assert!(read_to_end(&mut client).await.is_empty());

        let (session, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::ServerInternalError(_))));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_io_deadline_during_upload() {
        let mut harness = Harness::new(Some(DocumentKind::WordProcessing));
        harness.settings.io_timeout = Some(Duration::from_millis(100));
        let (mut client, handle) = harness.start();

        handshake(&mut client, b"report.docx;10").await;
        client.write_all(b"hel").await.unwrap();
        expect_status(&mut client, Status::ServerError).await;

        let (_, result) = handle.await.unwrap();
        match result {
            Err(SessionError::ServerInternalError(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::TimedOut)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_session_ids_are_unique() {
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let a = session_id(peer);
        let b = session_id(peer);
        assert_ne!(a, b);
        assert!(a.starts_with("10.0.0.1_4000_"));
    }

    #[test]
    fn test_ipv6_session_id_is_path_safe() {
        let id = session_id("[::1]:4000".parse().unwrap());
        assert!(!id.contains(':'));
        assert!(id.starts_with("--1_4000_"));
    }

    #[test]
    fn test_check_file_name() {
        let id = session_id("127.0.0.1:4000".parse().unwrap());
        assert!(check_file_name("report.docx", &id).is_ok());
        assert!(check_file_name("..report.docx", &id).is_ok());
        assert!(check_file_name("..", &id).is_err());
        assert!(check_file_name("a/b.docx", &id).is_err());
        assert!(check_file_name("a\0b", &id).is_err());
    }

    #[test]
    fn test_name_length_counts_session_prefix() {
        let narrow = session_id("1.1.1.1:1".parse().unwrap());
        let wide = session_id("[fe80:1234:5678:9abc:def0:1234:5678:9abc]:65535".parse().unwrap());
        let name = format!("{}.docx", "a".repeat(159));

        assert!(check_file_name(&name, &narrow).is_ok());
        assert!(check_file_name(&name, &wide).is_err());

        let longest = MAX_COMPONENT_LEN - wide.len() - 1 - OUTPUT_SUFFIX_RESERVE;
        assert!(check_file_name(&"b".repeat(longest), &wide).is_ok());
        assert!(check_file_name(&"b".repeat(longest + 1), &wide).is_err());
    }

    #[tokio::test]
    async fn test_long_name_from_wide_peer_rejected_before_ack() {
        let harness = Harness::new(Some(DocumentKind::WordProcessing));
        let (mut client, handle) = harness.start_from("192.168.100.200:50000");

        let metadata = format!("{}.docx;3", "a".repeat(195));
        write_frame(&mut client, metadata.as_bytes()).await.unwrap();
        assert!(read_to_end(&mut client).await.is_empty());

        let (session, result) = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::MalformedMetadata(_))));
        assert_eq!(session.source_path(), None);
        assert_eq!(harness.uploads(), 0);
    }

    #[tokio::test]
    async fn test_longest_accepted_name_is_stored() {
        let harness = Harness::new(Some(DocumentKind::WordProcessing));
        let (mut client, handle) = harness.start_from("192.168.100.200:50000");

        // 58-byte id, so 255 - 58 - 1 - 24 = 172 bytes remain.
        let name = format!("{}.docx", "a".repeat(167));
        handshake(&mut client, format!("{name};3").as_bytes()).await;
        client.write_all(b"doc").await.unwrap();
        expect_status(&mut client, Status::ConversionSuccessful).await;
        read_to_end(&mut client).await;

        let (session, result) = handle.await.unwrap();
        result.unwrap();
        assert_eq!(session.declared_name(), Some(name.as_str()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_client_gone_while_sending_result() {
        let harness = Harness::new(Some(DocumentKind::WordProcessing));
        let frame = |payload: &[u8]| {
            let mut framed = (payload.len() as u32).to_be_bytes().to_vec();
            framed.extend_from_slice(payload);
            framed
        };

        // Any write after the failed one would panic the mock.
        let stream = tokio_test::io::Builder::new()
            .read(&frame(b"report.docx;4"))
            .write(&frame(METADATA_ACK))
            .read(b"body")
            .write(&frame(Status::ConversionSuccessful.as_str().as_bytes()))
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
            .build();

        let mut session = Session::new("127.0.0.1:50000".parse().unwrap(), harness.context());
        let result = session.run(stream).await;

        match result {
            Err(SessionError::TransferWriteError(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(harness.converter.calls(), vec![DocumentKind::WordProcessing]);
    }

    #[test]
    fn test_state_progression() {
        let mut state = SessionState::AwaitingMetadata;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            state = next;
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                SessionState::AwaitingMetadata,
                SessionState::ReceivingFile,
                SessionState::Converting,
                SessionState::SendingResult,
                SessionState::Closed,
            ]
        );
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Converting.is_terminal());
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(SessionError::MalformedMetadata("x".into()).status(), None);
        assert_eq!(
            SessionError::IncompleteTransfer {
                expected: 2,
                received: 1
            }
            .status(),
            Some(Status::FileTransferError)
        );
        assert_eq!(
            SessionError::TransferWriteError(io::Error::other("x")).status(),
            None
        );
        assert_eq!(
            SessionError::ServerInternalError(io::Error::other("x")).status(),
            Some(Status::ServerError)
        );
    }
}
