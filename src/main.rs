//! convertd: TCP document conversion server
//!
//! Clients upload a Word, Excel or PowerPoint document and receive the
//! converted file back on the same connection.
//!
//! Features:
//! - Length-framed handshake and status messages
//! - One task per session with a configurable concurrency ceiling
//! - Optional per-operation and per-session deadlines
//! - Configuration via CLI arguments or TOML file

use convertd::config::Config;
use convertd::convert::{Dispatcher, OfficeConverter, SniffingDetector};
use convertd::server::Server;
use std::sync::Arc;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    convertd::init_tracing(&config.log_level);

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        upload_dir = %config.upload_dir.display(),
        output_dir = %config.output_dir.display(),
        converter = %config.converter_program,
        io_timeout = ?config.io_timeout,
        session_timeout = ?config.session_timeout,
        "Starting convertd server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    let dispatcher = Dispatcher::new(
        Arc::new(SniffingDetector),
        Arc::new(OfficeConverter::new(
            config.converter_program.clone(),
            config.spreadsheet_format.clone(),
        )),
        config.output_dir.clone(),
    );
    let server = Server::new(config, dispatcher);

    runtime
        .block_on(server.run())
        .map_err(|e| e as Box<dyn std::error::Error>)?;
    Ok(())
}
