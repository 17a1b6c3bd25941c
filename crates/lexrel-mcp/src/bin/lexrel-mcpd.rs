use std::io;

use lexrel_mcp::{LexrelServer, ServerConfig, Transport};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> io::Result<()> {
    let config = ServerConfig::from_env()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(lexrel_mcp::config::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let server = LexrelServer::from_config(&config).map_err(|err| {
        error!(db = %config.db_path, error = %err, "failed to open record store");
        io::Error::other(err.to_string())
    })?;

    match config.transport {
        Transport::Stdio => server.serve_stdio(),
    }
}
