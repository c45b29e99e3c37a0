//! Command-line client: upload one document and save the converted result.

use clap::Parser;
use convertd::client::{self, ClientError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "convertd-client")]
#[command(version = "0.1.0")]
#[command(about = "Upload a document to a convertd server", long_about = None)]
struct Args {
    /// Document to convert
    file: PathBuf,

    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:65432")]
    server: String,

    /// Where to save the converted file
    /// (defaults to converted_files/converted_<name>.pdf)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    convertd::init_tracing(&args.log_level);

    let output = args
        .output
        .unwrap_or_else(|| client::default_output_path(&args.file));

    match client::send_file(&args.server, &args.file, &output).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(ClientError::Rejected(status)) => {
            error!(%status, "Server rejected the document");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "Conversion request failed");
            ExitCode::FAILURE
        }
    }
}
