//! TCP server for conversion sessions.
//!
//! Accepts connections and runs one [`Session`] per connection on its own
//! task. Sessions share nothing but the immutable [`SessionContext`].

use crate::config::Config;
use crate::convert::Dispatcher;
use crate::session::{Session, SessionContext, SessionSettings};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, Instrument};

/// Pause after a failed accept, so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server instance
pub struct Server {
    config: Config,
    context: Arc<SessionContext>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, dispatcher: Dispatcher) -> Self {
        let context = Arc::new(SessionContext {
            settings: SessionSettings::from_config(&config),
            dispatcher,
        });
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            context,
            connection_limit,
        }
    }

    /// Create the upload and output directories if they are missing.
    pub fn prepare_directories(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.context.settings.upload_dir)?;
        std::fs::create_dir_all(self.context.dispatcher.output_dir())?;
        Ok(())
    }

    /// Bind the configured address.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr = self
            .config
            .listen
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no address found for {}", self.config.listen),
                )
            })?;

        TcpListener::from_std(create_listener(addr, self.config.backlog)?)
    }

    /// Start the server and begin accepting connections
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.prepare_directories()?;
        let listener = self.bind()?;
        info!(address = %listener.local_addr()?, "Server listening");
        self.serve(listener).await
    }

    /// Accept connections from `listener` until the process stops.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            // Wait for a session slot; excess connections queue in the backlog
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let context = Arc::clone(&self.context);

                    tokio::spawn(async move {
                        let mut session = Session::new(peer, context);
                        let span = info_span!("session", id = %session.id(), peer = %peer);
                        if let Err(e) = session.run(stream).instrument(span).await {
                            debug!(error = %e, "Session ended with error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    drop(permit);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Number of sessions that could start right now.
    #[cfg(test)]
    pub fn available_slots(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

/// Create a nonblocking listener with SO_REUSEADDR and the given backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}
