//! Declarative render operations and their ffmpeg argument lists.

use crate::error::{RenderError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Facts about the source needed by some operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_audio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "square")]
    Square,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "9:16")]
    Vertical,
}

impl AspectRatio {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "square" | "1:1" => Some(AspectRatio::Square),
            "16:9" => Some(AspectRatio::Wide),
            "4:3" => Some(AspectRatio::Standard),
            "9:16" => Some(AspectRatio::Vertical),
            _ => None,
        }
    }

    fn ratio(&self) -> f64 {
        match self {
            AspectRatio::Square => 1.0,
            AspectRatio::Wide => 16.0 / 9.0,
            AspectRatio::Standard => 4.0 / 3.0,
            AspectRatio::Vertical => 9.0 / 16.0,
        }
    }
}

fn default_position() -> i32 {
    50
}

fn default_font_size() -> u32 {
    24
}

fn default_color() -> String {
    "white".to_string()
}

fn default_mix_volume() -> f64 {
    1.0
}

/// An asset-producing edit. Serialized with an `operation` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EditOperation {
    Split {
        start: f64,
        #[serde(default)]
        end: Option<f64>,
    },
    Trim {
        start: f64,
        end: f64,
    },
    Speed {
        speed: f64,
    },
    Volume {
        volume_db: f64,
    },
    Crop {
        #[serde(default)]
        x: u32,
        #[serde(default)]
        y: u32,
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
        #[serde(default)]
        aspect_ratio: Option<AspectRatio>,
    },
    Rotate {
        angle: i32,
    },
    Fade {
        #[serde(default)]
        fade_in: f64,
        #[serde(default)]
        fade_out: f64,
    },
    Text {
        text: String,
        #[serde(default = "default_position")]
        x: i32,
        #[serde(default = "default_position")]
        y: i32,
        #[serde(default = "default_font_size")]
        font_size: u32,
        #[serde(default = "default_color")]
        color: String,
    },
    Pip {
        overlay: String,
        #[serde(default = "default_position")]
        x: i32,
        #[serde(default = "default_position")]
        y: i32,
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
    },
    Reverse,
    Opacity {
        alpha: f64,
    },
    /// Keep the video stream, take the audio from `audio`.
    ReplaceAudio {
        audio: String,
    },
    /// Mix `audio` under the source's own sound, scaled by `volume`.
    AddAudio {
        audio: String,
        #[serde(default = "default_mix_volume")]
        volume: f64,
    },
    Duplicate,
}

/// What a client submits: a source asset plus the operation to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub source: String,
    #[serde(flatten)]
    pub operation: EditOperation,
}

impl EditOperation {
    pub fn name(&self) -> &'static str {
        match self {
            EditOperation::Split { .. } => "split",
            EditOperation::Trim { .. } => "trim",
            EditOperation::Speed { .. } => "speed",
            EditOperation::Volume { .. } => "volume",
            EditOperation::Crop { .. } => "crop",
            EditOperation::Rotate { .. } => "rotate",
            EditOperation::Fade { .. } => "fade",
            EditOperation::Text { .. } => "text",
            EditOperation::Pip { .. } => "pip",
            EditOperation::Reverse => "reverse",
            EditOperation::Opacity { .. } => "opacity",
            EditOperation::ReplaceAudio { .. } => "replace_audio",
            EditOperation::AddAudio { .. } => "add_audio",
            EditOperation::Duplicate => "duplicate",
        }
    }

    /// The second media input some operations read, as a mutable path so the
    /// server can resolve it the same way as the source.
    pub fn extra_input_mut(&mut self) -> Option<&mut String> {
        match self {
            EditOperation::Pip { overlay, .. } => Some(overlay),
            EditOperation::ReplaceAudio { audio } | EditOperation::AddAudio { audio, .. } => {
                Some(audio)
            }
            _ => None,
        }
    }

    /// Reject parameters ffmpeg would choke on, before a task is created.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RenderError::InvalidParameter(msg));
        match self {
            EditOperation::Split { start, end } => {
                if !start.is_finite() || *start < 0.0 {
                    return invalid(format!("split start must be >= 0, got {start}"));
                }
                if let Some(end) = end {
                    if !end.is_finite() || end <= start {
                        return invalid(format!("split end {end} must be after start {start}"));
                    }
                }
            }
            EditOperation::Trim { start, end } => {
                if !start.is_finite() || !end.is_finite() || *start < 0.0 || end <= start {
                    return invalid(format!("trim range [{start}, {end}) is empty or negative"));
                }
            }
            EditOperation::Speed { speed } => {
                if !speed.is_finite() || *speed <= 0.0 {
                    return invalid(format!("speed must be > 0, got {speed}"));
                }
            }
            EditOperation::Volume { volume_db } => {
                if !volume_db.is_finite() {
                    return invalid("volumeDb must be a finite number".into());
                }
            }
            EditOperation::Crop {
                width,
                height,
                aspect_ratio,
                ..
            } => match (width, height, aspect_ratio) {
                (_, _, Some(_)) => {}
                (Some(w), Some(h), None) if *w > 0 && *h > 0 => {}
                _ => return invalid("crop needs width and height, or an aspectRatio".into()),
            },
            EditOperation::Rotate { angle } => {
                if transpose_for(*angle).is_none() {
                    return invalid(format!("rotation angle must be 90, 180, 270 or -90, got {angle}"));
                }
            }
            EditOperation::Fade { fade_in, fade_out } => {
                if !fade_in.is_finite() || !fade_out.is_finite() || *fade_in < 0.0 || *fade_out < 0.0 {
                    return invalid("fade durations must be >= 0".into());
                }
                if *fade_in == 0.0 && *fade_out == 0.0 {
                    return invalid("fade needs fadeIn or fadeOut".into());
                }
            }
            EditOperation::Text { text, .. } => {
                if text.trim().is_empty() {
                    return invalid("text must not be empty".into());
                }
            }
            EditOperation::Pip { overlay, .. } => {
                if overlay.trim().is_empty() {
                    return invalid("pip needs an overlay file".into());
                }
            }
            EditOperation::Opacity { alpha } => {
                if !alpha.is_finite() {
                    return invalid("alpha must be a finite number".into());
                }
            }
            EditOperation::ReplaceAudio { audio } => {
                if audio.trim().is_empty() {
                    return invalid("replace_audio needs an audio file".into());
                }
            }
            EditOperation::AddAudio { audio, volume } => {
                if audio.trim().is_empty() {
                    return invalid("add_audio needs an audio file".into());
                }
                if !volume.is_finite() || *volume < 0.0 {
                    return invalid(format!("volume must be >= 0, got {volume}"));
                }
            }
            EditOperation::Reverse | EditOperation::Duplicate => {}
        }
        Ok(())
    }

    /// Whether building the command requires probing the source first.
    pub fn needs_probe(&self) -> bool {
        match self {
            EditOperation::Crop { aspect_ratio, .. } => aspect_ratio.is_some(),
            EditOperation::Fade { fade_out, .. } => *fade_out > 0.0,
            EditOperation::ReplaceAudio { .. }
            | EditOperation::AddAudio { .. }
            | EditOperation::Duplicate => false,
            _ => true,
        }
    }

    /// Duration of the rendered output, used to turn ffmpeg `time=` into a percentage.
    pub fn expected_duration(&self, info: &SourceInfo) -> Option<f64> {
        let source = info.duration;
        match self {
            EditOperation::Split { start, end } => match end {
                Some(end) => Some(end - start),
                None => source.map(|d| (d - start).max(0.0)),
            },
            EditOperation::Trim { start, end } => Some(end - start),
            EditOperation::Speed { speed } => source.map(|d| d / speed),
            _ => source,
        }
    }
}

/// `<dir>/<stem>_<operation>_<short-task-id><ext>`
pub fn output_path(source: &Path, operation: &str, task_id: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".mp4".to_string());
    let short: String = task_id.chars().filter(|c| *c != '-').take(8).collect();
    source.with_file_name(format!("{stem}_{operation}_{short}{ext}"))
}

/// Build the full ffmpeg argument list (without the binary) for one operation.
pub fn build_args(
    source: &Path,
    operation: &EditOperation,
    output: &Path,
    info: &SourceInfo,
) -> Result<Vec<String>> {
    operation.validate()?;

    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), path_arg(source)];

    match operation {
        EditOperation::Split { start, end } => {
            args.extend(["-ss".into(), start.to_string()]);
            if let Some(end) = end {
                args.extend(["-t".into(), (end - start).to_string()]);
            }
            args.extend(["-c".into(), "copy".into()]);
        }
        EditOperation::Trim { start, end } => {
            args.extend([
                "-ss".into(),
                start.to_string(),
                "-t".into(),
                (end - start).to_string(),
                "-c:v".into(),
                "libx264".into(),
                "-c:a".into(),
                "aac".into(),
            ]);
        }
        EditOperation::Speed { speed } => {
            let video = format!("[0:v]setpts={}*PTS[v]", 1.0 / speed);
            if info.has_audio {
                args.extend([
                    "-filter_complex".into(),
                    format!("{video};[0:a]{}[a]", atempo_chain(*speed)),
                    "-map".into(),
                    "[v]".into(),
                    "-map".into(),
                    "[a]".into(),
                ]);
            } else {
                args.extend(["-filter_complex".into(), video, "-map".into(), "[v]".into()]);
            }
        }
        EditOperation::Volume { volume_db } => {
            args.extend([
                "-af".into(),
                format!("volume={volume_db}dB"),
                "-c:v".into(),
                "copy".into(),
            ]);
        }
        EditOperation::Crop {
            x,
            y,
            width,
            height,
            aspect_ratio,
        } => {
            let (w, h, x, y) = match aspect_ratio {
                Some(aspect) => aspect_crop(*aspect, info)?,
                None => match (width, height) {
                    (Some(w), Some(h)) => (*w, *h, *x, *y),
                    _ => {
                        return Err(RenderError::InvalidParameter(
                            "crop needs width and height".into(),
                        ))
                    }
                },
            };
            args.extend(["-filter:v".into(), format!("crop={w}:{h}:{x}:{y}")]);
        }
        EditOperation::Rotate { angle } => {
            // validate() guarantees a mapping exists.
            let transpose = transpose_for(*angle).unwrap_or("1");
            args.extend(["-vf".into(), format!("transpose={transpose}")]);
        }
        EditOperation::Fade { fade_in, fade_out } => {
            let mut video = Vec::new();
            let mut audio = Vec::new();
            if *fade_in > 0.0 {
                video.push(format!("fade=t=in:st=0:d={fade_in}"));
                audio.push(format!("afade=t=in:st=0:d={fade_in}"));
            }
            if *fade_out > 0.0 {
                let duration = info.duration.ok_or_else(|| {
                    RenderError::InvalidParameter("fade out needs the source duration".into())
                })?;
                let start = (duration - fade_out).max(0.0);
                video.push(format!("fade=t=out:st={start}:d={fade_out}"));
                audio.push(format!("afade=t=out:st={start}:d={fade_out}"));
            }
            args.extend(["-vf".into(), video.join(",")]);
            if info.has_audio {
                args.extend(["-af".into(), audio.join(",")]);
            }
        }
        EditOperation::Text {
            text,
            x,
            y,
            font_size,
            color,
        } => {
            args.extend([
                "-vf".into(),
                format!(
                    "drawtext=text='{}':x={x}:y={y}:fontsize={font_size}:fontcolor={color}",
                    escape_drawtext(text)
                ),
                "-c:a".into(),
                "copy".into(),
            ]);
        }
        EditOperation::Pip {
            overlay,
            x,
            y,
            width,
            height,
        } => {
            let graph = match (width, height) {
                (Some(w), Some(h)) => format!("[1:v]scale={w}:{h}[ov];[0:v][ov]overlay={x}:{y}[v]"),
                _ => format!("[0:v][1:v]overlay={x}:{y}[v]"),
            };
            args.extend([
                "-i".into(),
                overlay.clone(),
                "-filter_complex".into(),
                graph,
                "-map".into(),
                "[v]".into(),
                "-map".into(),
                "0:a?".into(),
                "-c:v".into(),
                "libx264".into(),
                "-c:a".into(),
                "aac".into(),
                "-shortest".into(),
            ]);
        }
        EditOperation::Reverse => {
            args.extend(["-vf".into(), "reverse".into()]);
            if info.has_audio {
                args.extend(["-af".into(), "areverse".into()]);
            }
        }
        EditOperation::Opacity { alpha } => {
            let alpha = alpha.clamp(0.0, 1.0);
            args.extend([
                "-vf".into(),
                format!("colorchannelmixer=aa={alpha}"),
                "-c:a".into(),
                "copy".into(),
            ]);
        }
        EditOperation::ReplaceAudio { audio } => {
            args.extend([
                "-i".into(),
                audio.clone(),
                "-map".into(),
                "0:v:0".into(),
                "-map".into(),
                "1:a:0".into(),
                "-c:v".into(),
                "copy".into(),
                "-c:a".into(),
                "aac".into(),
                "-shortest".into(),
            ]);
        }
        EditOperation::AddAudio { audio, volume } => {
            let graph = if info.has_audio {
                format!("[1:a]volume={volume}[bg];[0:a][bg]amix=inputs=2:duration=first[mix]")
            } else {
                format!("[1:a]volume={volume}[mix]")
            };
            args.extend([
                "-i".into(),
                audio.clone(),
                "-filter_complex".into(),
                graph,
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "[mix]".into(),
                "-c:v".into(),
                "copy".into(),
                "-c:a".into(),
                "aac".into(),
                "-shortest".into(),
            ]);
        }
        EditOperation::Duplicate => {
            args.extend(["-map".into(), "0".into(), "-c".into(), "copy".into()]);
        }
    }

    args.push(path_arg(output));
    Ok(args)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn transpose_for(angle: i32) -> Option<&'static str> {
    match angle {
        90 => Some("1"),
        180 => Some("1,1"),
        270 | -90 => Some("2"),
        _ => None,
    }
}

/// atempo only accepts factors in [0.5, 2], so larger changes are chained.
fn atempo_chain(speed: f64) -> String {
    let mut filters = Vec::new();
    let mut remaining = speed;
    while remaining > 2.0 {
        filters.push("atempo=2".to_string());
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        filters.push("atempo=0.5".to_string());
        remaining /= 0.5;
    }
    filters.push(format!("atempo={remaining}"));
    filters.join(",")
}

/// Largest centered crop with the requested aspect, dimensions rounded down to even.
fn aspect_crop(aspect: AspectRatio, info: &SourceInfo) -> Result<(u32, u32, u32, u32)> {
    let (w, h) = match (info.width, info.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(RenderError::InvalidParameter(
                "aspect crop needs the source dimensions".into(),
            ))
        }
    };
    let ratio = aspect.ratio();
    let (cw, ch) = if (w as f64) / (h as f64) > ratio {
        (((h as f64) * ratio) as u32, h)
    } else {
        (w, ((w as f64) / ratio) as u32)
    };
    let (cw, ch) = (cw & !1, ch & !1);
    Ok((cw, ch, (w - cw) / 2, (h - ch) / 2))
}

fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}
