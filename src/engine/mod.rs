// FOTA Engine - Core module structure
pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod database;
pub mod fota;
pub mod logging;
pub mod registry;
pub mod server;
pub mod storage;
pub mod verify;

pub use config::Config;
pub use database::Database;
pub use fota::FotaService;
