//! File commands.
//!
//! Each command opens one connection, prints the daemon's response to
//! stdout, and reports whether it indicated success.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sealkeep_daemon::protocol::{ProtocolResult, indicates_success};

use super::Target;

/// Replace `path` with the contents of `file` (or stdin).
pub fn modify(target: &Target, path: &str, file: Option<&Path>) -> Result<bool> {
    let data = read_payload(file)?;
    let client = target.client();
    run(async move { client.modify(path, &data).await })
}

/// Delete `path`.
pub fn delete(target: &Target, path: &str) -> Result<bool> {
    let client = target.client();
    run(async move { client.delete(path).await })
}

/// Merge the contents of `file` (or stdin) into `path`.
pub fn update(target: &Target, path: &str, file: Option<&Path>) -> Result<bool> {
    let data = read_payload(file)?;
    let client = target.client();
    run(async move { client.incremental_update(path, &data).await })
}

/// Print the info record for `path`.
pub fn info(target: &Target, path: &str) -> Result<bool> {
    let client = target.client();
    run(async move { client.get_info(path).await })
}

fn run(request: impl Future<Output = ProtocolResult<String>>) -> Result<bool> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let response = rt
        .block_on(request)
        .context("request to daemon failed")?;

    println!("{response}");
    Ok(indicates_success(&response))
}

fn read_payload(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(file) => {
            std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))
        },
        None => {
            let mut data = Vec::new();
            std::io::stdin()
                .lock()
                .read_to_end(&mut data)
                .context("failed to read stdin")?;
            Ok(data)
        },
    }
}
