//! Deterministic natural-language command parser for the chat assistant.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

pub const ASPECT_RATIOS: [&str; 4] = ["square", "16:9", "4:3", "9:16"];

/// Structured edit derived from a chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "action",
    content = "parameters",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum CommandAction {
    Cut {
        timestamp: f64,
    },
    Crop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aspect_ratio: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
    Speed {
        speed: f64,
    },
    Pip {
        overlay_file: String,
        timestamp: f64,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },
    Reverse,
    Rotate {
        angle: i32,
    },
    Delete,
    Trim {
        start: f64,
        end: f64,
    },
}

impl CommandAction {
    pub fn name(&self) -> &'static str {
        match self {
            CommandAction::Cut { .. } => "cut",
            CommandAction::Crop { .. } => "crop",
            CommandAction::Speed { .. } => "speed",
            CommandAction::Pip { .. } => "pip",
            CommandAction::Text { .. } => "text",
            CommandAction::Reverse => "reverse",
            CommandAction::Rotate { .. } => "rotate",
            CommandAction::Delete => "delete",
            CommandAction::Trim { .. } => "trim",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedCommand {
    #[serde(flatten)]
    pub action: CommandAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub raw_command: String,
}

/// Editor state sent along with a chat message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playhead: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Cut,
    Crop,
    Speed,
    Pip,
    Text,
    Reverse,
    Rotate,
    Delete,
    Trim,
}

/// Patterns match case-insensitively so captured text keeps the user's casing.
fn re(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("command pattern is a valid regex")
}

// Order matters: the first matching pattern wins.
static PATTERNS: Lazy<Vec<(Kind, Regex)>> = Lazy::new(|| {
    vec![
        (Kind::Cut, re(r"cut\s+.*?\s+at\s+(\d+(?:\.\d+)?)\s*(?:seconds?|s)")),
        (Kind::Cut, re(r"split\s+.*?\s+at\s+(\d+(?:\.\d+)?)\s*(?:seconds?|s)")),
        (Kind::Cut, re(r"cut\s+at\s+(\d+(?:\.\d+)?)\s*(?:seconds?|s)")),
        (Kind::Crop, re(r"crop\s+.*?\s+to\s+(?:a\s+)?(square|16:9|4:3|9:16)")),
        (Kind::Crop, re(r"crop\s+.*?\s+(\d+)\s*[xX]\s*(\d+)")),
        (Kind::Crop, re(r"make\s+.*?\s+(square|16:9|4:3)")),
        (Kind::Speed, re(r"(?:change|set|make)\s+.*?\s+speed\s+to\s+(\d*\.?\d+)\s*x")),
        (Kind::Speed, re(r"speed\s+.*?\s+up\s+by\s+(\d*\.?\d+)\s*x")),
        (Kind::Speed, re(r"slow\s+.*?\s+down\s+by\s+(\d*\.?\d+)\s*x")),
        (Kind::Speed, re(r"(\d*\.?\d+)\s*x\s+speed")),
        (Kind::Pip, re(r"add\s+(?:a\s+)?pip\s+of\s+(.*?)\s+at\s+(\d+)\s*(?:seconds?|s)")),
        (Kind::Pip, re(r"picture\s+in\s+picture\s+(.*?)\s+at\s+(\d+)")),
        (Kind::Pip, re(r"overlay\s+(.*?)\s+at\s+(\d+)")),
        (Kind::Text, re(r#"add\s+text\s+"(.*?)"\s+at\s+(\d+)\s*(?:seconds?|s)"#)),
        (Kind::Text, re(r#"overlay\s+text\s+"(.*?)""#)),
        (Kind::Text, re(r#"caption\s+"(.*?)""#)),
        (Kind::Reverse, re(r"reverse\s+.*")),
        (Kind::Reverse, re(r"play\s+.*?\s+backwards")),
        (Kind::Rotate, re(r"rotate\s+.*?\s+(-?\d+)\s*degrees?")),
        (Kind::Rotate, re(r"turn\s+.*?\s+(-?\d+)\s*degrees?")),
        (Kind::Delete, re(r"delete\s+.*")),
        (Kind::Delete, re(r"remove\s+.*")),
        (Kind::Trim, re(r"trim\s+.*?\s+from\s+(\d+(?:\.\d+)?)\s+to\s+(\d+(?:\.\d+)?)")),
        (Kind::Trim, re(r"cut\s+.*?\s+from\s+(\d+(?:\.\d+)?)\s+to\s+(\d+(?:\.\d+)?)")),
        (Kind::Trim, re(r"(?:cut|remove)\s+(?:the\s+)?first\s+(\d+(?:\.\d+)?)\s*(?:seconds?|s)")),
    ]
});

static FILE_PATTERN: Lazy<Regex> =
    Lazy::new(|| re(r"([a-z0-9_\-.]+\.(?:mp4|mov|avi|mkv|webm|mp3|wav|jpg|png))"));

/// Map a chat message to a structured command, or `None` when no pattern matches.
pub fn parse_command(message: &str, context: &CommandContext) -> Option<ParsedCommand> {
    let file = extract_filename(message, context);

    PATTERNS.iter().find_map(|(kind, pattern)| {
        let caps = pattern.captures(message)?;
        let action = build_action(*kind, &caps)?;
        Some(ParsedCommand {
            action,
            file: file.clone(),
            raw_command: message.to_string(),
        })
    })
}

fn extract_filename(message: &str, context: &CommandContext) -> Option<String> {
    if let Some(selected) = context.selected_file.as_deref().filter(|s| !s.is_empty()) {
        return Some(selected.to_string());
    }
    FILE_PATTERN
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn group<'a>(caps: &'a Captures<'_>, index: usize) -> Option<&'a str> {
    caps.get(index).map(|m| m.as_str())
}

fn number(caps: &Captures<'_>, index: usize) -> Option<f64> {
    group(caps, index)?.parse().ok()
}

fn build_action(kind: Kind, caps: &Captures<'_>) -> Option<CommandAction> {
    let action = match kind {
        Kind::Cut => CommandAction::Cut {
            timestamp: number(caps, 1)?,
        },
        Kind::Crop => {
            let first = group(caps, 1)?.to_lowercase();
            if ASPECT_RATIOS.contains(&first.as_str()) {
                CommandAction::Crop {
                    aspect_ratio: Some(first),
                    width: None,
                    height: None,
                }
            } else {
                CommandAction::Crop {
                    aspect_ratio: None,
                    width: Some(first.parse().ok()?),
                    height: Some(group(caps, 2)?.parse().ok()?),
                }
            }
        }
        Kind::Speed => CommandAction::Speed {
            speed: number(caps, 1)?,
        },
        Kind::Pip => CommandAction::Pip {
            overlay_file: group(caps, 1)?.trim().to_string(),
            timestamp: number(caps, 2)?,
        },
        Kind::Text => CommandAction::Text {
            text: group(caps, 1)?.to_string(),
            timestamp: number(caps, 2),
        },
        Kind::Reverse => CommandAction::Reverse,
        Kind::Rotate => CommandAction::Rotate {
            angle: group(caps, 1)?.parse().ok()?,
        },
        Kind::Delete => CommandAction::Delete,
        Kind::Trim => {
            if caps.len() >= 3 {
                CommandAction::Trim {
                    start: number(caps, 1)?,
                    end: number(caps, 2)?,
                }
            } else {
                CommandAction::Trim {
                    start: 0.0,
                    end: number(caps, 1)?,
                }
            }
        }
    };
    Some(action)
}
