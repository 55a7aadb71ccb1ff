//! Client configuration from CLI flags and environment variables.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "filesync-client", about = "Mirror a local directory against a filesync server")]
pub struct Config {
    /// Server endpoint.
    #[arg(long, env = "FILESYNC_SERVER", default_value = "http://127.0.0.1:50051")]
    pub server: String,

    /// Local mirror directory. Defaults to `filesync` under the user's
    /// home directory.
    #[arg(long, env = "FILESYNC_MOUNT")]
    pub mount: Option<PathBuf>,

    /// Identity file location. Defaults to `filesync/identity.json`
    /// under the user's config directory, outside the mirror so the
    /// watcher never syncs it.
    #[arg(long, env = "FILESYNC_IDENTITY")]
    pub identity: Option<PathBuf>,
}

impl Config {
    pub fn mount_dir(&self) -> PathBuf {
        self.mount.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("filesync")
        })
    }

    pub fn identity_file(&self) -> PathBuf {
        self.identity.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("filesync")
                .join("identity.json")
        })
    }
}
