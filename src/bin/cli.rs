//! FOTA CLI - Main entry point for the `fota` binary
//!
//! Runs the firmware service and provides operator commands against the
//! registry, the blob store and a running server.

use anyhow::Context;
use clap::Parser;
use crisp_fota::engine::{
    cli::formatter::{format_size, CliFormatter},
    cli::{Cli, Commands, FirmwareAction, OutputFormat, StorageAction},
    client::FotaClient,
    config::Config,
    database::Database,
    logging,
    registry::{FirmwareRegistry, SqliteRegistry},
    server,
    storage::open_store,
};
use futures_util::TryStreamExt;
use std::path::Path;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init();

    if let Err(e) = run_cli(cli).await {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let json_output = cli.format == OutputFormat::Json;
    let config = load_config(cli.config_path().as_deref())?;

    match cli.command {
        Commands::Serve { port, host } => {
            cmd_serve(config, host, port).await?;
        }
        Commands::Migrate => {
            cmd_migrate(&config, json_output)?;
        }
        Commands::Firmware { action } => {
            cmd_firmware(action, &config, json_output)?;
        }
        Commands::Storage { action } => {
            cmd_storage(action, &config, json_output).await?;
        }
        Commands::Upload {
            server,
            version,
            description,
            file,
            token,
        } => {
            let token = token.or_else(|| config.auth.admin_api_token.clone());
            cmd_upload(&server, &version, description.as_deref(), &file, token, json_output).await?;
        }
        Commands::Check {
            server,
            current_version,
            device_id,
        } => {
            cmd_check(&server, current_version.as_deref(), device_id.as_deref(), json_output).await?;
        }
        Commands::Download {
            server,
            version,
            out,
            device_id,
        } => {
            cmd_download(&server, &version, &out, device_id.as_deref(), json_output).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            Config::load(path).with_context(|| format!("failed to load configuration from {}", path.display()))?
        }
        None => Config::from_env().context("invalid configuration")?,
    };
    Ok(config)
}

async fn cmd_serve(mut config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    server::run(config).await
}

fn cmd_migrate(config: &Config, json: bool) -> anyhow::Result<()> {
    let db = Database::new(&config.database.path)
        .with_context(|| format!("failed to open database {}", config.database.path.display()))?;
    let tables = db.get_tables()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "success": true,
                "database": config.database.path.display().to_string(),
                "tables": tables
            })
        );
    } else {
        CliFormatter::success("Firmware registry schema is up to date");
        CliFormatter::kv("Database", &config.database.path.display().to_string());
        for table in &tables {
            CliFormatter::item(table);
        }
    }
    Ok(())
}

fn cmd_firmware(action: FirmwareAction, config: &Config, json: bool) -> anyhow::Result<()> {
    let db = Database::new(&config.database.path)
        .with_context(|| format!("failed to open database {}", config.database.path.display()))?;
    let registry = SqliteRegistry::new(db);

    match action {
        FirmwareAction::List => {
            let records = registry.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                CliFormatter::info("No firmware registered");
            } else {
                CliFormatter::header(&format!("Firmware ({})", records.len()));
                CliFormatter::firmware_table(&records);
            }
        }
    }
    Ok(())
}

async fn cmd_storage(action: StorageAction, config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(&config.storage)
        .await
        .context("failed to initialize blob storage")?;

    match action {
        StorageAction::List { prefix } => {
            let keys: Vec<String> = store.list(&prefix).try_collect().await?;
            if json {
                println!("{}", serde_json::json!({ "backend": store.kind(), "keys": keys }));
            } else if keys.is_empty() {
                CliFormatter::info(&format!("No blobs in {} storage", store.kind()));
            } else {
                CliFormatter::header(&format!("Blobs in {} storage ({})", store.kind(), keys.len()));
                for key in &keys {
                    CliFormatter::item(key);
                }
            }
        }
    }

    store.close().await?;
    Ok(())
}

async fn cmd_upload(
    server: &str,
    version: &str,
    description: Option<&str>,
    file: &Path,
    token: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    if token.is_none() && !json {
        CliFormatter::warning("No admin token given; the upload only succeeds if the server has none configured");
    }

    let client = FotaClient::new(server)?.with_token(token);
    let receipt = client
        .upload(version, description, file)
        .await
        .with_context(|| format!("upload of {} failed", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        CliFormatter::upload_receipt(&receipt);
    }
    Ok(())
}

async fn cmd_check(
    server: &str,
    current_version: Option<&str>,
    device_id: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let client = FotaClient::new(server)?;
    let response = client.check(current_version, device_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        CliFormatter::check_result(&response);
    }
    Ok(())
}

async fn cmd_download(
    server: &str,
    version: &str,
    out: &Path,
    device_id: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let client = FotaClient::new(server)?;
    let result = client
        .download(version, device_id, out, |downloaded, total| {
            if !json {
                CliFormatter::transfer_progress(downloaded, total);
            }
        })
        .await?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "success": true,
                "version": result.version,
                "path": result.path.display().to_string(),
                "bytes": result.bytes_downloaded,
                "checksum": result.checksum
            })
        );
    } else {
        CliFormatter::blank();
        CliFormatter::success(&format!(
            "Firmware {} saved to {} ({})",
            result.version,
            result.path.display(),
            format_size(result.bytes_downloaded)
        ));
        CliFormatter::kv("MD5", &result.checksum);
    }
    Ok(())
}
