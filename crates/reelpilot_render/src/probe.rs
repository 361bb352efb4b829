use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{RenderError, Result};
use crate::ops::SourceInfo;

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run ffprobe on a media file and extract what the render builders need.
pub async fn probe_source(ffprobe: &str, path: &Path) -> Result<SourceInfo> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(RenderError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| RenderError::FfprobeExec(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RenderError::FfprobeFailed(stderr.into_owned()));
    }

    parse_probe_output(&output.stdout)
}

/// Coarse media category for a file name: `video`, `audio` or `image`.
pub fn media_kind(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tiff" | "svg" => "image",
        "mp3" | "wav" | "flac" | "aac" | "ogg" | "m4a" | "wma" => "audio",
        _ => "video",
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_probe_output(stdout: &[u8]) -> Result<SourceInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video = probe.streams.iter().find(|s| s.codec_type == "video");
    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0);

    Ok(SourceInfo {
        duration,
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        has_audio,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "channels": 2}
        ],
        "format": {"filename": "clip.mp4", "duration": "12.480000"}
    }"#;

    #[test]
    fn parses_video_with_audio() {
        let info = parse_probe_output(SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.width, Some(1280));
        assert_eq!(info.height, Some(720));
        assert!(info.has_audio);
        assert!((info.duration.unwrap() - 12.48).abs() < 1e-9);
    }

    #[test]
    fn silent_video_has_no_audio() {
        let json = r#"{"streams":[{"codec_type":"video","width":640,"height":480}],"format":{}}"#;
        let info = parse_probe_output(json.as_bytes()).unwrap();
        assert!(!info.has_audio);
        assert_eq!(info.duration, None);
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(RenderError::Json(_))
        ));
    }

    #[test]
    fn media_kind_by_extension() {
        assert_eq!(media_kind(Path::new("photo.PNG")), "image");
        assert_eq!(media_kind(Path::new("song.mp3")), "audio");
        assert_eq!(media_kind(Path::new("clip.mkv")), "video");
        assert_eq!(media_kind(Path::new("noext")), "video");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = probe_source("ffprobe", Path::new("/definitely/not/here.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::FileNotFound(_)));
    }
}
