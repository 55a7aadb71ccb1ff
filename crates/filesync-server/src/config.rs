use std::path::PathBuf;

use clap::Parser;

/// Configuration for the filesync server daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "filesync-server")]
#[command(about = "Central file store: per-path locks, chunked transfer, change notifications")]
pub struct Config {
    /// TCP host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "FILESYNC_HOST")]
    pub host: String,

    /// TCP port to bind to
    #[arg(long, default_value = "50051", env = "FILESYNC_PORT")]
    pub port: u16,

    /// Directory backing the canonical file tree
    #[arg(long, default_value = "filesync-data", env = "FILESYNC_MOUNT")]
    pub mount: PathBuf,
}
