//! CLI Output Formatting Module
//! Consistent, colorized terminal output for operator commands

use colored::Colorize;

use crate::engine::fota::{CheckStatus, CheckUpdateResponse, UploadReceipt};
use crate::engine::registry::FirmwareRecord;

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.len()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print a list item
    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Print an empty line
    pub fn blank() {
        println!();
    }

    /// Print a table header
    pub fn table_header(columns: &[&str]) {
        let header = columns
            .iter()
            .map(|c| c.bright_white().bold().to_string())
            .collect::<Vec<_>>()
            .join(" │ ");
        println!("  {}", header);
        println!("  {}", "─".repeat(columns.iter().map(|c| c.len() + 3).sum()).bright_black());
    }

    /// Print a table row
    pub fn table_row(values: &[&str]) {
        println!("  {}", values.join(" │ "));
    }

    /// Redraw an in-place transfer progress bar
    pub fn transfer_progress(downloaded: u64, total: u64) {
        let line = if total > 0 {
            let percentage = (downloaded.min(total) as f64 / total as f64 * 100.0) as u32;
            let filled = (percentage / 5) as usize;
            format!(
                "  [{}{}] {}% ({} / {})",
                "█".repeat(filled).bright_green(),
                "░".repeat(20 - filled).bright_black(),
                percentage,
                format_size(downloaded),
                format_size(total)
            )
        } else {
            format!("  {} received", format_size(downloaded))
        };
        print!("\r{}", line);
        std::io::Write::flush(&mut std::io::stdout()).ok();
    }

    pub fn firmware_table(records: &[FirmwareRecord]) {
        Self::table_header(&["Version", "Size", "Checksum", "Active", "Created"]);
        for record in records {
            let size = format_size(record.size_bytes);
            let active = if record.is_active { "yes" } else { "no" };
            let created = record.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
            Self::table_row(&[&record.version, &size, &record.checksum, active, &created]);
        }
    }

    pub fn check_result(response: &CheckUpdateResponse) {
        match response.status {
            CheckStatus::NoUpdate => Self::success("Device is up to date"),
            CheckStatus::UpdateAvailable => {
                Self::info("Update available");
                if let Some(version) = &response.version {
                    Self::kv("Version", version);
                }
                if let Some(size) = response.file_size {
                    Self::kv("Size", &format_size(size));
                }
                if let Some(checksum) = &response.checksum {
                    Self::kv("MD5", checksum);
                }
                if let Some(url) = &response.download_url {
                    Self::kv("Download", url);
                }
                if let Some(description) = response.description.as_deref().filter(|d| !d.is_empty()) {
                    Self::kv("Notes", description);
                }
            }
        }
    }

    pub fn upload_receipt(receipt: &UploadReceipt) {
        Self::success(&format!("Firmware {} uploaded and activated", receipt.version));
        Self::kv("Size", &format_size(receipt.file_size));
        Self::kv("MD5", &receipt.checksum);
        Self::kv("Key", &receipt.storage_key);
        Self::kv("URL", &receipt.resolved_url);
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
