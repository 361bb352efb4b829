use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const DEFAULT_FPS: f64 = 30.0;

// ---------------------------------------------------------------------------
// Timecode
// ---------------------------------------------------------------------------

/// Format seconds as `HH:MM:SS.mmm`. Negative values get a leading `-`.
pub fn format_timecode(seconds: f64) -> String {
    let total_ms = (seconds.abs() * 1_000.0).round() as u64;
    let ms = total_ms % 1_000;
    let total_secs = total_ms / 1_000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    let sign = if seconds < 0.0 { "-" } else { "" };
    format!("{sign}{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
}

// ---------------------------------------------------------------------------
// TrackKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Text,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
            TrackKind::Text => "text",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TextStyle
// ---------------------------------------------------------------------------

/// Style of an inline text clip. `x`/`y` are percentages of the frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TextStyle {
    pub font_size: u32,
    pub color: String,
    pub font_weight: String,
    pub x: f64,
    pub y: f64,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 24,
            color: "white".to_string(),
            font_weight: "normal".to_string(),
            x: 50.0,
            y: 50.0,
        }
    }
}

// ---------------------------------------------------------------------------
// ClipContent
// ---------------------------------------------------------------------------

/// What a clip points at. Serialized inline into the clip with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClipContent {
    Video {
        source: String,
    },
    Audio {
        source: String,
    },
    Text {
        text: String,
        #[serde(default)]
        style: TextStyle,
    },
}

impl ClipContent {
    pub fn kind(&self) -> TrackKind {
        match self {
            ClipContent::Video { .. } => TrackKind::Video,
            ClipContent::Audio { .. } => TrackKind::Audio,
            ClipContent::Text { .. } => TrackKind::Text,
        }
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            ClipContent::Video { source } | ClipContent::Audio { source } => Some(source),
            ClipContent::Text { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Clip
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: String,
    pub start: f64,
    pub end: f64,
    #[serde(flatten)]
    pub content: ClipContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// In-point inside the source asset, in seconds.
    #[serde(default)]
    pub offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_id: Option<String>,
}

impl Clip {
    pub fn video(id: impl Into<String>, start: f64, end: f64, source: impl Into<String>) -> Self {
        Self::with_content(id, start, end, ClipContent::Video { source: source.into() })
    }

    pub fn audio(id: impl Into<String>, start: f64, end: f64, source: impl Into<String>) -> Self {
        Self::with_content(id, start, end, ClipContent::Audio { source: source.into() })
    }

    pub fn text(id: impl Into<String>, start: f64, end: f64, text: impl Into<String>) -> Self {
        Self::with_content(
            id,
            start,
            end,
            ClipContent::Text {
                text: text.into(),
                style: TextStyle::default(),
            },
        )
    }

    fn with_content(id: impl Into<String>, start: f64, end: f64, content: ClipContent) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            content,
            name: None,
            offset: 0.0,
            linked_id: None,
        }
    }

    pub fn linked_to(mut self, other: impl Into<String>) -> Self {
        self.linked_id = Some(other.into());
        self
    }

    pub fn kind(&self) -> TrackKind {
        self.content.kind()
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// True when `time` lies strictly inside the clip, i.e. a valid split point.
    pub fn straddles(&self, time: f64) -> bool {
        self.start < time && time < self.end
    }

    /// Half-open containment `[start, end)`.
    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time < self.end
    }

    pub fn has_valid_bounds(&self) -> bool {
        bounds_are_valid(self.start, self.end)
    }
}

pub(crate) fn bounds_are_valid(start: f64, end: f64) -> bool {
    start.is_finite() && end.is_finite() && start >= 0.0 && start < end
}

// ---------------------------------------------------------------------------
// Track
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub clips: Vec<Clip>,
}

impl Track {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            muted: false,
            hidden: false,
            locked: false,
            clips: vec![],
        }
    }

    pub fn clip(&self, clip_id: &str) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == clip_id)
    }

    pub fn accepts(&self, clip: &Clip) -> bool {
        self.kind == clip.kind()
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timeline {
    pub id: String,
    pub tracks: Vec<Track>,
    /// Derived: max clip end over all tracks. Recomputed after every mutation.
    #[serde(default)]
    pub duration: f64,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified: DateTime<Utc>,
}

fn default_fps() -> f64 {
    DEFAULT_FPS
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Partial clip update. Absent fields are left untouched; `name: null` and
/// `linkedId: null` clear the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClipPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub name: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<TextStylePatch>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub linked_id: Option<Option<String>>,
}

impl ClipPatch {
    pub fn bounds(start: f64, end: f64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TextStylePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ---------------------------------------------------------------------------
// ProjectSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub track_count: usize,
    pub clip_count: usize,
    pub duration: f64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl From<&Timeline> for ProjectSummary {
    fn from(timeline: &Timeline) -> Self {
        Self {
            id: timeline.id.clone(),
            track_count: timeline.tracks.len(),
            clip_count: timeline.tracks.iter().map(|t| t.clips.len()).sum(),
            duration: timeline.duration,
            created: timeline.created,
            modified: timeline.modified,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
