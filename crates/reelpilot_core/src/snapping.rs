use crate::types::*;
use serde::{Deserialize, Serialize};

/// Snap configuration held by the client store. Times are in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapSettings {
    pub enabled: bool,
    pub grid: f64,
    pub threshold: f64,
}

impl Default for SnapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            grid: 0.5,
            threshold: 0.1,
        }
    }
}

/// Nearest point within `threshold`, or `position` unchanged.
pub fn find_snap_point(position: f64, snap_points: &[f64], threshold: f64) -> f64 {
    let mut best = position;
    let mut best_dist = f64::INFINITY;

    for &point in snap_points {
        let dist = (position - point).abs();
        if dist < best_dist {
            best = point;
            best_dist = dist;
        }
    }

    if best_dist <= threshold {
        best
    } else {
        position
    }
}

/// Zero, the playhead, and every clip edge except those of `exclude_clip`.
pub fn collect_snap_points(
    timeline: &Timeline,
    exclude_clip: Option<&str>,
    playhead: f64,
) -> Vec<f64> {
    let mut points = vec![0.0, playhead];

    for track in &timeline.tracks {
        for clip in &track.clips {
            if Some(clip.id.as_str()) == exclude_clip {
                continue;
            }
            points.push(clip.start);
            points.push(clip.end);
        }
    }

    points.sort_by(f64::total_cmp);
    points.dedup();
    points
}

/// Nearest multiple of `grid`. A non-positive grid disables grid snapping.
pub fn nearest_grid_line(position: f64, grid: f64) -> Option<f64> {
    if grid > 0.0 && grid.is_finite() {
        Some((position / grid).round() * grid)
    } else {
        None
    }
}

/// Snap `position` against edges, playhead, zero and the grid.
pub fn snap(
    position: f64,
    timeline: &Timeline,
    exclude_clip: Option<&str>,
    playhead: f64,
    settings: &SnapSettings,
) -> f64 {
    if !settings.enabled {
        return position;
    }
    let mut points = collect_snap_points(timeline, exclude_clip, playhead);
    if let Some(line) = nearest_grid_line(position, settings.grid) {
        points.push(line);
    }
    find_snap_point(position, &points, settings.threshold)
}
