//! FOTA CLI Module
//! Command-line interface for running the service and operating on firmware

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::config::CONFIG_FILE_NAME;

#[derive(Parser, Debug)]
#[command(name = "fota")]
#[command(author = "Crisp Games Team")]
#[command(version)]
#[command(about = "Firmware-over-the-air service for Crisp game devices", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./fota.config.json when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the FOTA HTTP service
    Serve {
        /// Port to listen on (overrides configuration)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides configuration)
        #[arg(long)]
        host: Option<String>,
    },

    /// Create the firmware registry schema if it is missing
    Migrate,

    /// Inspect the firmware registry
    Firmware {
        #[command(subcommand)]
        action: FirmwareAction,
    },

    /// Inspect the configured blob storage
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },

    /// Upload a firmware binary to a running service
    Upload {
        /// Service base URL including any route prefix
        #[arg(short, long)]
        server: String,

        /// Firmware version label
        #[arg(short, long)]
        version: String,

        /// Release notes shown to devices
        #[arg(short, long)]
        description: Option<String>,

        /// Firmware binary to upload
        #[arg(long)]
        file: PathBuf,

        /// Admin token (defaults to the configured admin token)
        #[arg(short, long)]
        token: Option<String>,
    },

    /// Ask a running service whether an update is available
    Check {
        /// Service base URL including any route prefix
        #[arg(short, long)]
        server: String,

        /// Version the device is running
        #[arg(long)]
        current_version: Option<String>,

        /// Device identifier sent for logging
        #[arg(long)]
        device_id: Option<String>,
    },

    /// Download and verify a firmware binary
    Download {
        /// Service base URL including any route prefix
        #[arg(short, long)]
        server: String,

        /// Firmware version to download
        #[arg(short, long)]
        version: String,

        /// Destination file
        #[arg(short, long)]
        out: PathBuf,

        /// Device identifier sent for logging
        #[arg(long)]
        device_id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum FirmwareAction {
    /// List registered firmware, newest first
    List,
}

#[derive(Subcommand, Debug)]
pub enum StorageAction {
    /// List stored blob keys
    List {
        /// Only keys starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

impl Cli {
    /// Explicit `--config`, else the default file in the working directory if it exists
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config {
            return Some(path.clone());
        }
        let default = PathBuf::from(CONFIG_FILE_NAME);
        default.is_file().then_some(default)
    }
}
