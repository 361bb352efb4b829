use crate::error::{RenderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lines of stderr kept for error reports.
const STDERR_TAIL: usize = 12;

/// One parsed ffmpeg status line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderProgress {
    pub percent: f64,
    /// Output position reached, in seconds.
    pub position: f64,
    pub frame: u64,
    /// Encoding speed relative to realtime, when ffmpeg reports one.
    pub speed: Option<f64>,
    pub eta_seconds: Option<f64>,
}

/// Whether `bin --version` can be spawned.
pub async fn binary_available(bin: &str) -> bool {
    Command::new(bin)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok()
}

/// Run ffmpeg with `args`, streaming parsed progress into `progress_tx`.
///
/// ffmpeg rewrites its progress line with carriage returns, so stderr is
/// split on `\r` as well as `\n`. Cancelling `cancel` kills the child.
pub async fn execute(
    ffmpeg: &str,
    args: &[String],
    total_secs: f64,
    progress_tx: watch::Sender<RenderProgress>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut child = Command::new(ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::FfmpegNotFound
            } else {
                RenderError::Io(e)
            }
        })?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RenderError::FfmpegFailed("stderr was not captured".into()))?;
    let mut segments = BufReader::new(stderr).split(b'\r');
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);

    let read_stderr = async {
        while let Ok(Some(segment)) = segments.next_segment().await {
            let text = String::from_utf8_lossy(&segment);
            for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if let Some(progress) = parse_progress(line, total_secs) {
                    let _ = progress_tx.send(progress);
                } else {
                    if tail.len() == STDERR_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                }
            }
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!("cancelling ffmpeg");
            let _ = child.kill().await;
            return Err(RenderError::Cancelled);
        }
        _ = read_stderr => {}
    }

    let waited = tokio::select! {
        _ = cancel.cancelled() => None,
        status = child.wait() => Some(status),
    };
    let Some(status) = waited else {
        let _ = child.kill().await;
        return Err(RenderError::Cancelled);
    };
    let status = status?;

    if !status.success() {
        let detail = tail.into_iter().collect::<Vec<_>>().join("\n");
        return Err(RenderError::FfmpegFailed(format!(
            "ffmpeg exited with {status}: {detail}"
        )));
    }

    Ok(())
}

/// Read a status line such as
/// `frame=  123 fps= 60 q=28.0 size= 512kB time=00:01:02.05 bitrate=... speed=1.5x`.
/// Lines without a usable `time=` are not progress.
pub fn parse_progress(line: &str, total_secs: f64) -> Option<RenderProgress> {
    let fields = status_fields(line);
    let field = |key: &str| fields.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

    let position = field("time").and_then(parse_clock)?;
    let frame = field("frame").and_then(|v| v.parse().ok()).unwrap_or(0);
    let speed = field("speed")
        .and_then(|v| v.trim_end_matches('x').parse::<f64>().ok())
        .filter(|s| *s > 0.0);

    let percent = if total_secs > 0.0 {
        (position / total_secs * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    let remaining = total_secs - position;
    let eta_seconds = speed.filter(|_| remaining > 0.0).map(|s| remaining / s);

    Some(RenderProgress {
        percent,
        position,
        frame,
        speed,
        eta_seconds,
    })
}

/// Split `key=value` pairs. ffmpeg pads values with spaces after `=`, so a
/// token ending in `=` takes the next token as its value.
fn status_fields(line: &str) -> Vec<(&str, &str)> {
    let mut fields = Vec::new();
    let mut tokens = line.split_whitespace();
    while let Some(token) = tokens.next() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let value = if value.is_empty() {
            tokens.next().unwrap_or_default()
        } else {
            value
        };
        fields.push((key, value));
    }
    fields
}

/// `HH:MM:SS.ss` to seconds. Anything else, including `N/A`, is `None`.
fn parse_clock(clock: &str) -> Option<f64> {
    let parts: Vec<f64> = clock
        .split(':')
        .map(|p| p.parse::<f64>().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [h, m, s] if *h >= 0.0 && *m >= 0.0 && *s >= 0.0 => Some(h * 3600.0 + m * 60.0 + s),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
