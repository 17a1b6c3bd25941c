pub mod config;
pub mod protocol;
pub mod server;
pub mod stdio;

pub use config::{ServerConfig, Transport};
pub use server::LexrelServer;
