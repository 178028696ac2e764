//! Remote copies wrap the external `rsync` binary. The argument set and the
//! progress-parsing contract are fixed: combined output is consumed
//! byte-at-a-time, `\r` and `\n` both terminate a line, and a line whose
//! first whitespace token is a comma-grouped integer carries the cumulative
//! byte count.

use std::process::Stdio;

use camino::Utf8Path;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::transfer::TransferHooks;
use crate::TransferError;

pub async fn rsync_copy(
    src: &Utf8Path,
    dst: &str,
    bandwidth_limit: u64,
    password: Option<&str>,
    hooks: &TransferHooks,
) -> Result<u64, TransferError> {
    let mut cmd = Command::new("rsync");
    cmd.arg("-a")
        .arg("--partial")
        .arg("--protect-args")
        .arg("--mkpath")
        .arg("--progress");
    if bandwidth_limit > 0 {
        // rsync takes KB/s.
        cmd.arg(format!("--bwlimit={}", (bandwidth_limit / 1024).max(1)));
    }
    cmd.arg(src.as_str()).arg(dst);
    if let Some(pw) = password {
        cmd.env("RSYNC_PASSWORD", pw);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(src = %src, dst, "spawning rsync");
    let mut child = cmd.spawn().map_err(|source| TransferError::Open {
        path: "rsync".to_string(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out_task = tokio::spawn(parse_stream(stdout, hooks.clone()));
    let err_task = tokio::spawn(parse_stream(stderr, hooks.clone()));

    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.map_err(|source| TransferError::Open {
                    path: "rsync".to_string(),
                    source,
                })?;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                if (hooks.is_paused)() {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return Err(TransferError::Paused);
                }
            }
        }
    };

    let out_bytes = out_task.await.unwrap_or(0);
    let err_bytes = err_task.await.unwrap_or(0);

    if !status.success() {
        return Err(TransferError::RemoteRsync {
            code: status.code().unwrap_or(-1),
        });
    }
    Ok(out_bytes.max(err_bytes))
}

/// Read a child stream byte-by-byte, reporting the latest cumulative byte
/// count seen on any progress line. Returns the highest count observed.
async fn parse_stream<R>(stream: Option<R>, hooks: TransferHooks) -> u64
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let Some(mut stream) = stream else {
        return 0;
    };
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    let mut high_water: u64 = 0;

    loop {
        match stream.read(&mut byte).await {
            Ok(0) => break,
            Ok(_) => {
                if byte[0] == b'\r' || byte[0] == b'\n' {
                    if let Some(bytes) = parse_progress_line(&line) {
                        if bytes > high_water {
                            high_water = bytes;
                            (hooks.on_progress)(bytes);
                        }
                    }
                    line.clear();
                } else {
                    line.push(byte[0]);
                }
            }
            Err(_) => break,
        }
    }
    if let Some(bytes) = parse_progress_line(&line) {
        if bytes > high_water {
            high_water = bytes;
            (hooks.on_progress)(bytes);
        }
    }
    high_water
}

/// `"  1,234,567  42%  ..."` -> 1234567. Anything whose first token is not
/// a comma-grouped integer is ignored.
fn parse_progress_line(line: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(line).ok()?;
    let token = text.split_whitespace().next()?;
    let digits: String = token.chars().filter(|c| *c != ',').collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
