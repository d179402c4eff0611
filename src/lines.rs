//! Streaming line access for large text files.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::instrument;

use crate::error::{GatewayError, Result};

async fn open(path: &Path) -> Result<BufReader<File>> {
    match File::open(path).await {
        Ok(file) => Ok(BufReader::new(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(GatewayError::not_found(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn strip_line_ending(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}

/// Read the 1-indexed line `n` of a file.
///
/// Returns `Ok(None)` when the file has fewer than `n` lines. The file is
/// read line by line and closed as soon as the target line is produced.
#[instrument(skip_all, fields(path = %path.display(), n))]
pub async fn read_line(path: &Path, n: u64) -> Result<Option<String>> {
    if n == 0 {
        return Err(GatewayError::BadRequest(
            "line number must be a positive integer".into(),
        ));
    }

    let mut reader = open(path).await?;
    let mut buf = String::new();
    let mut current = 0u64;
    loop {
        buf.clear();
        if reader.read_line(&mut buf).await? == 0 {
            return Ok(None);
        }
        current += 1;
        if current == n {
            strip_line_ending(&mut buf);
            return Ok(Some(buf));
        }
    }
}

/// Count the lines of a file that are non-empty after trimming.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn count_non_empty_lines(path: &Path) -> Result<u64> {
    let mut lines = open(path).await?.lines();
    let mut count = 0u64;
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
