//! Monolith wrapper producing the single-file HTML asset of a bundle.
//!
//! Monolith inlines CSS, images and fonts as data URIs so the saved page
//! renders offline.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::constants::ARCHIVAL_USER_AGENT;

/// Default timeout for monolith execution in seconds.
pub const DEFAULT_MONOLITH_TIMEOUT_SECS: u64 = 60;

/// Archive hosts never fetched as page assets.
const BLOCKED_ASSET_DOMAINS: [&str; 9] = [
    "web.archive.org",
    "archive.org",
    "archive.today",
    "archive.is",
    "archive.ph",
    "archive.fo",
    "archive.li",
    "archive.md",
    "archive.vn",
];

/// Max chars of monolith output kept in error messages.
const MAX_OUTPUT_LEN: usize = 2000;

#[derive(Debug, Clone)]
pub struct MonolithConfig {
    pub enabled: bool,
    /// Path to the monolith executable.
    pub path: String,
    pub timeout: Duration,
}

impl Default for MonolithConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "monolith".to_string(),
            timeout: Duration::from_secs(DEFAULT_MONOLITH_TIMEOUT_SECS),
        }
    }
}

/// Build the monolith command line for `input`.
fn build_command(input: &str, output_path: &Path, config: &MonolithConfig) -> Command {
    let mut cmd = Command::new(&config.path);
    cmd.arg(input).arg("-o").arg(output_path);

    // Isolate the saved page and drop JavaScript.
    cmd.arg("-I").arg("-j");

    for domain in BLOCKED_ASSET_DOMAINS {
        cmd.arg("-B").arg(domain);
    }

    cmd.arg("-t").arg("30");
    cmd.arg("-u").arg(ARCHIVAL_USER_AGENT);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    cmd
}

/// Create a self-contained HTML file from `input` (URL or local file).
///
/// # Errors
///
/// Returns an error if monolith is disabled, fails without producing output,
/// or times out.
pub async fn create_single_file(input: &str, output_path: &Path, config: &MonolithConfig) -> Result<()> {
    if !config.enabled {
        anyhow::bail!("Monolith archiving is disabled");
    }

    debug!(input = %input, output = %output_path.display(), "Creating single-file HTML with monolith");

    let output = tokio::time::timeout(config.timeout, build_command(input, output_path, config).output())
        .await
        .context("Monolith execution timed out")?
        .context("Failed to execute monolith")?;

    if !output.status.success() {
        let stderr = truncate_output(&String::from_utf8_lossy(&output.stderr));

        // Monolith can exit non-zero on partial failures yet still write a usable file.
        if !output_path.exists() {
            anyhow::bail!(
                "Monolith failed with exit code {:?}: {}",
                output.status.code(),
                stderr
            );
        }
        warn!(
            input = %input,
            exit_code = ?output.status.code(),
            stderr = %stderr,
            "Monolith completed with warnings but produced output file"
        );
    }

    if !output_path.exists() {
        anyhow::bail!("Monolith did not create output file");
    }

    Ok(())
}

fn truncate_output(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() > MAX_OUTPUT_LEN {
        let mut end = MAX_OUTPUT_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}...[truncated {} more bytes]",
            &trimmed[..end],
            trimmed.len() - end
        )
    } else {
        trimmed.to_string()
    }
}
