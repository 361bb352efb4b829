use crate::error::{CoreError, Result};
use crate::types::*;
use uuid::Uuid;

/// What a split produced. `original` ids are gone from the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub track_id: String,
    pub original: String,
    pub left: String,
    pub right: String,
    pub linked: Option<LinkedSplit>,
    /// `(track_id, clip_id)` of a partner that was not split but whose
    /// back-reference now points at the left segment.
    pub relinked: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedSplit {
    pub track_id: String,
    pub original: String,
    pub left: String,
    pub right: String,
}

impl Timeline {
    pub fn track(&self, track_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub fn track_mut(&mut self, track_id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == track_id)
    }

    /// Look a clip up anywhere on the timeline, returning its owning track.
    pub fn find_clip(&self, clip_id: &str) -> Option<(&Track, &Clip)> {
        self.tracks
            .iter()
            .find_map(|t| t.clip(clip_id).map(|c| (t, c)))
    }

    /// All clips whose half-open range contains `time`, in track order.
    pub fn clips_at(&self, time: f64) -> Vec<(&Track, &Clip)> {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter().map(move |c| (t, c)))
            .filter(|(_, c)| c.contains(time))
            .collect()
    }

    pub fn has_clip_id(&self, clip_id: &str) -> bool {
        self.find_clip_location(clip_id).is_some()
    }

    pub fn clip_count(&self) -> usize {
        self.tracks.iter().map(|t| t.clips.len()).sum()
    }

    /// Recompute `duration` as the latest clip end (0 when empty).
    pub fn refresh_duration(&mut self) {
        self.duration = self
            .tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .map(|c| c.end)
            .fold(0.0, f64::max);
    }

    /// Pairs of clip ids on `track_id` whose ranges overlap.
    pub fn overlaps(&self, track_id: &str) -> Result<Vec<(String, String)>> {
        let track = self
            .track(track_id)
            .ok_or_else(|| CoreError::TrackNotFound(track_id.to_string()))?;

        let mut pairs = Vec::new();
        for (i, a) in track.clips.iter().enumerate() {
            for b in &track.clips[i + 1..] {
                if clips_overlap(a, b) {
                    pairs.push((a.id.clone(), b.id.clone()));
                }
            }
        }
        Ok(pairs)
    }

    // -----------------------------------------------------------------------
    // Clip mutations
    // -----------------------------------------------------------------------

    /// Append a clip to a track.
    pub fn add_clip(&mut self, track_id: &str, clip: Clip) -> Result<()> {
        let ti = self.unlocked_track_index(track_id)?;
        check_compatible(&self.tracks[ti], &clip)?;
        check_bounds(clip.start, clip.end)?;
        if self.has_clip_id(&clip.id) {
            return Err(CoreError::DuplicateClip(clip.id));
        }

        self.tracks[ti].clips.push(clip);
        self.refresh_duration();
        Ok(())
    }

    /// Remove a clip by id. Returns the removed clip.
    pub fn remove_clip(&mut self, track_id: &str, clip_id: &str) -> Result<Clip> {
        let ti = self.unlocked_track_index(track_id)?;
        let ci = self.clip_index(ti, clip_id)?;

        let removed = self.tracks[ti].clips.remove(ci);
        self.refresh_duration();
        Ok(removed)
    }

    /// Merge a partial update into a clip. The merged clip is validated before
    /// it replaces the stored one.
    pub fn update_clip(&mut self, track_id: &str, clip_id: &str, patch: &ClipPatch) -> Result<()> {
        let ti = self.unlocked_track_index(track_id)?;
        let ci = self.clip_index(ti, clip_id)?;

        let mut updated = self.tracks[ti].clips[ci].clone();
        apply_patch(&mut updated, patch)?;
        check_bounds(updated.start, updated.end)?;

        self.tracks[ti].clips[ci] = updated;
        self.refresh_duration();
        Ok(())
    }

    /// Swap a clip for the two segments of a split, keeping its position on
    /// the track. Used to replay a split whose segment ids are already chosen.
    pub fn replace_with_split(
        &mut self,
        track_id: &str,
        clip_id: &str,
        left: Clip,
        right: Clip,
    ) -> Result<()> {
        let ti = self.unlocked_track_index(track_id)?;
        self.clip_index(ti, clip_id)?;
        for segment in [&left, &right] {
            check_compatible(&self.tracks[ti], segment)?;
            check_bounds(segment.start, segment.end)?;
            if segment.id != clip_id && self.has_clip_id(&segment.id) {
                return Err(CoreError::DuplicateClip(segment.id.clone()));
            }
        }
        if left.id == right.id {
            return Err(CoreError::DuplicateClip(right.id));
        }

        replace_with_segments(&mut self.tracks[ti], clip_id, left, right);
        self.refresh_duration();
        Ok(())
    }

    /// Move a clip to `[new_start, new_end)` on `to_track`. Moving onto the
    /// same track updates the bounds in place; otherwise the clip is removed
    /// from the source and appended to the destination.
    pub fn move_clip(
        &mut self,
        clip_id: &str,
        from_track: &str,
        to_track: &str,
        new_start: f64,
        new_end: f64,
    ) -> Result<()> {
        let from = self.unlocked_track_index(from_track)?;
        let ci = self.clip_index(from, clip_id)?;
        let to = self.unlocked_track_index(to_track)?;
        check_bounds(new_start, new_end)?;
        check_compatible(&self.tracks[to], &self.tracks[from].clips[ci])?;

        if from == to {
            let clip = &mut self.tracks[from].clips[ci];
            clip.start = new_start;
            clip.end = new_end;
        } else {
            let mut clip = self.tracks[from].clips.remove(ci);
            clip.start = new_start;
            clip.end = new_end;
            self.tracks[to].clips.push(clip);
        }

        self.refresh_duration();
        Ok(())
    }

    /// Split a clip at `time` into `[start, time)` and `[time, end)`.
    /// The position must be strictly inside the clip. A linked partner that
    /// also straddles `time` is split too and the halves are re-linked
    /// left to left, right to right.
    pub fn split_clip(&mut self, track_id: &str, clip_id: &str, time: f64) -> Result<SplitOutcome> {
        let ti = self.unlocked_track_index(track_id)?;
        let ci = self.clip_index(ti, clip_id)?;
        let clip = self.tracks[ti].clips[ci].clone();

        if !clip.straddles(time) {
            return Err(CoreError::InvalidOperation(format!(
                "split position {} must be strictly between clip start {} and end {}",
                time, clip.start, clip.end
            )));
        }

        let partner = clip
            .linked_id
            .as_deref()
            .filter(|pid| *pid != clip.id)
            .and_then(|pid| self.find_clip_location(pid))
            .map(|(pt, pc)| (pt, self.tracks[pt].clips[pc].clone()));

        let split_partner = match &partner {
            Some((pt, p)) if p.straddles(time) => {
                if self.tracks[*pt].locked {
                    return Err(CoreError::TrackLocked(self.tracks[*pt].id.clone()));
                }
                true
            }
            _ => false,
        };

        let mut reserved = Vec::new();
        let left_id = self.fresh_id(format!("{}-L", clip.id), &reserved);
        reserved.push(left_id.clone());
        let right_id = self.fresh_id(format!("{}-R", clip.id), &reserved);
        reserved.push(right_id.clone());

        let (mut left, mut right) = split_segments(&clip, time, left_id.clone(), right_id.clone());
        let mut outcome = SplitOutcome {
            track_id: track_id.to_string(),
            original: clip.id.clone(),
            left: left_id.clone(),
            right: right_id.clone(),
            linked: None,
            relinked: None,
        };

        match partner {
            Some((pt, p)) if split_partner => {
                let pleft_id = self.fresh_id(format!("{}-L", p.id), &reserved);
                reserved.push(pleft_id.clone());
                let pright_id = self.fresh_id(format!("{}-R", p.id), &reserved);

                let (mut pleft, mut pright) =
                    split_segments(&p, time, pleft_id.clone(), pright_id.clone());
                left.linked_id = Some(pleft_id.clone());
                right.linked_id = Some(pright_id.clone());
                pleft.linked_id = Some(left_id.clone());
                pright.linked_id = Some(right_id.clone());

                replace_with_segments(&mut self.tracks[ti], &clip.id, left, right);
                replace_with_segments(&mut self.tracks[pt], &p.id, pleft, pright);

                outcome.linked = Some(LinkedSplit {
                    track_id: self.tracks[pt].id.clone(),
                    original: p.id,
                    left: pleft_id,
                    right: pright_id,
                });
            }
            Some((pt, p)) => {
                right.linked_id = None;
                replace_with_segments(&mut self.tracks[ti], &clip.id, left, right);

                if p.linked_id.as_deref() == Some(clip.id.as_str()) && !self.tracks[pt].locked {
                    let track = &mut self.tracks[pt];
                    if let Some(back) = track.clips.iter_mut().find(|c| c.id == p.id) {
                        back.linked_id = Some(left_id.clone());
                    }
                    outcome.relinked = Some((track.id.clone(), p.id));
                }
            }
            None => {
                right.linked_id = None;
                replace_with_segments(&mut self.tracks[ti], &clip.id, left, right);
            }
        }

        self.refresh_duration();
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Track mutations
    // -----------------------------------------------------------------------

    /// Append a track named `<kind>-<n>` with the smallest unused `n`.
    pub fn add_track(&mut self, kind: TrackKind) -> String {
        let mut n = 1;
        let id = loop {
            let candidate = format!("{}-{}", kind, n);
            if self.track(&candidate).is_none() {
                break candidate;
            }
            n += 1;
        };
        self.tracks.push(Track::new(id.clone(), kind));
        id
    }

    /// Append a track with a caller-chosen id.
    pub fn insert_track(&mut self, track_id: &str, kind: TrackKind) -> Result<()> {
        if self.track(track_id).is_some() {
            return Err(CoreError::InvalidOperation(format!(
                "track {} already exists",
                track_id
            )));
        }
        self.tracks.push(Track::new(track_id, kind));
        Ok(())
    }

    /// Apply flag changes. Allowed on locked tracks so they can be unlocked.
    pub fn update_track(&mut self, track_id: &str, patch: TrackPatch) -> Result<()> {
        let track = self
            .track_mut(track_id)
            .ok_or_else(|| CoreError::TrackNotFound(track_id.to_string()))?;
        if let Some(muted) = patch.muted {
            track.muted = muted;
        }
        if let Some(hidden) = patch.hidden {
            track.hidden = hidden;
        }
        if let Some(locked) = patch.locked {
            track.locked = locked;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookup helpers
    // -----------------------------------------------------------------------

    fn find_clip_location(&self, clip_id: &str) -> Option<(usize, usize)> {
        for (ti, track) in self.tracks.iter().enumerate() {
            for (ci, clip) in track.clips.iter().enumerate() {
                if clip.id == clip_id {
                    return Some((ti, ci));
                }
            }
        }
        None
    }

    fn unlocked_track_index(&self, track_id: &str) -> Result<usize> {
        let ti = self
            .tracks
            .iter()
            .position(|t| t.id == track_id)
            .ok_or_else(|| CoreError::TrackNotFound(track_id.to_string()))?;
        if self.tracks[ti].locked {
            return Err(CoreError::TrackLocked(track_id.to_string()));
        }
        Ok(ti)
    }

    fn clip_index(&self, track_idx: usize, clip_id: &str) -> Result<usize> {
        self.tracks[track_idx]
            .clips
            .iter()
            .position(|c| c.id == clip_id)
            .ok_or_else(|| CoreError::ClipNotFound(clip_id.to_string()))
    }

    fn fresh_id(&self, base: String, reserved: &[String]) -> String {
        let mut candidate = base.clone();
        while self.has_clip_id(&candidate) || reserved.contains(&candidate) {
            let suffix = Uuid::new_v4().simple().to_string();
            candidate = format!("{}-{}", base, &suffix[..6]);
        }
        candidate
    }
}

/// Ranges are half-open, so touching clips do not overlap.
fn clips_overlap(a: &Clip, b: &Clip) -> bool {
    a.start < b.end && b.start < a.end
}

fn check_bounds(start: f64, end: f64) -> Result<()> {
    if bounds_are_valid(start, end) {
        Ok(())
    } else {
        Err(CoreError::InvalidOperation(format!(
            "clip bounds must satisfy 0 <= start < end, got [{}, {})",
            start, end
        )))
    }
}

fn check_compatible(track: &Track, clip: &Clip) -> Result<()> {
    if track.accepts(clip) {
        Ok(())
    } else {
        Err(CoreError::IncompatibleTrack {
            clip_id: clip.id.clone(),
            clip_kind: clip.kind().to_string(),
            track_kind: track.kind.to_string(),
        })
    }
}

fn split_segments(clip: &Clip, time: f64, left_id: String, right_id: String) -> (Clip, Clip) {
    let mut left = clip.clone();
    left.id = left_id;
    left.end = time;

    let mut right = clip.clone();
    right.id = right_id;
    right.start = time;
    right.offset = clip.offset + (time - clip.start);

    (left, right)
}

fn replace_with_segments(track: &mut Track, original_id: &str, left: Clip, right: Clip) {
    if let Some(pos) = track.clips.iter().position(|c| c.id == original_id) {
        track.clips.splice(pos..=pos, [left, right]);
    }
}

fn apply_patch(clip: &mut Clip, patch: &ClipPatch) -> Result<()> {
    if let Some(start) = patch.start {
        clip.start = start;
    }
    if let Some(end) = patch.end {
        clip.end = end;
    }
    if let Some(offset) = patch.offset {
        if !offset.is_finite() || offset < 0.0 {
            return Err(CoreError::InvalidOperation(
                "offset must be a non-negative number".into(),
            ));
        }
        clip.offset = offset;
    }
    if let Some(name) = &patch.name {
        clip.name = name.clone();
    }
    if let Some(linked) = &patch.linked_id {
        clip.linked_id = linked.clone();
    }

    match &mut clip.content {
        ClipContent::Video { source } | ClipContent::Audio { source } => {
            if patch.text.is_some() || patch.style.is_some() {
                return Err(CoreError::InvalidOperation(format!(
                    "clip {} is not a text clip",
                    clip.id
                )));
            }
            if let Some(new_source) = &patch.source {
                *source = new_source.clone();
            }
        }
        ClipContent::Text { text, style } => {
            if patch.source.is_some() {
                return Err(CoreError::InvalidOperation(format!(
                    "text clip {} has no media source",
                    clip.id
                )));
            }
            if let Some(new_text) = &patch.text {
                *text = new_text.clone();
            }
            if let Some(style_patch) = &patch.style {
                merge_style(style, style_patch);
            }
        }
    }
    Ok(())
}

fn merge_style(style: &mut TextStyle, patch: &TextStylePatch) {
    if let Some(size) = patch.font_size {
        style.font_size = size;
    }
    if let Some(color) = &patch.color {
        style.color = color.clone();
    }
    if let Some(weight) = &patch.font_weight {
        style.font_weight = weight.clone();
    }
    if let Some(x) = patch.x {
        style.x = x.clamp(0.0, 100.0);
    }
    if let Some(y) = patch.y {
        style.y = y.clamp(0.0, 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_timeline() -> Timeline {
        Timeline::new("p1")
    }

    fn clip_ids(timeline: &Timeline, track_id: &str) -> Vec<String> {
        timeline
            .track(track_id)
            .unwrap()
            .clips
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    fn expected_duration(timeline: &Timeline) -> f64 {
        timeline
            .tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .map(|c| c.end)
            .fold(0.0, f64::max)
    }

    // -- Add -----------------------------------------------------------------

    #[test]
    fn add_clip_updates_duration() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("c1", 0.0, 10.0, "a.mp4")).unwrap();
        assert_eq!(tl.duration, 10.0);
        assert_eq!(clip_ids(&tl, "video-1"), vec!["c1"]);
    }

    #[test]
    fn add_clip_to_unknown_track_fails() {
        let mut tl = make_test_timeline();
        let before = tl.clone();
        let err = tl
            .add_clip("video-9", Clip::video("c1", 0.0, 1.0, "a.mp4"))
            .unwrap_err();
        assert!(matches!(err, CoreError::TrackNotFound(_)));
        assert_eq!(tl, before);
    }

    #[test]
    fn add_text_clip_to_video_track_rejected() {
        let mut tl = make_test_timeline();
        let err = tl
            .add_clip("video-1", Clip::text("t1", 0.0, 2.0, "hi"))
            .unwrap_err();
        assert!(matches!(err, CoreError::IncompatibleTrack { .. }));
        assert!(tl.track("video-1").unwrap().clips.is_empty());
    }

    #[test]
    fn add_duplicate_id_across_tracks_rejected() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("c1", 0.0, 1.0, "a.mp4")).unwrap();
        let err = tl
            .add_clip("audio-1", Clip::audio("c1", 0.0, 1.0, "a.wav"))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateClip(id) if id == "c1"));
    }

    #[test]
    fn add_clip_with_bad_bounds_rejected() {
        let mut tl = make_test_timeline();
        for (s, e) in [(5.0, 5.0), (6.0, 5.0), (-1.0, 2.0), (0.0, f64::INFINITY)] {
            let err = tl
                .add_clip("video-1", Clip::video("c", s, e, "a.mp4"))
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidOperation(_)));
        }
        assert_eq!(tl.clip_count(), 0);
    }

    #[test]
    fn overlapping_clips_are_permitted_and_reported() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("a", 0.0, 5.0, "a.mp4")).unwrap();
        tl.add_clip("video-1", Clip::video("b", 4.0, 8.0, "b.mp4")).unwrap();
        tl.add_clip("video-1", Clip::video("c", 8.0, 9.0, "c.mp4")).unwrap();
        let pairs = tl.overlaps("video-1").unwrap();
        assert_eq!(pairs, vec![("a".to_string(), "b".to_string())]);
    }

    // -- Locked tracks -------------------------------------------------------

    #[test]
    fn locked_track_rejects_clip_mutations() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("c1", 0.0, 10.0, "a.mp4")).unwrap();
        tl.update_track("video-1", TrackPatch { locked: Some(true), ..Default::default() })
            .unwrap();
        let before = tl.clone();

        assert!(matches!(
            tl.add_clip("video-1", Clip::video("c2", 0.0, 1.0, "b.mp4")),
            Err(CoreError::TrackLocked(_))
        ));
        assert!(matches!(tl.remove_clip("video-1", "c1"), Err(CoreError::TrackLocked(_))));
        assert!(matches!(
            tl.split_clip("video-1", "c1", 5.0),
            Err(CoreError::TrackLocked(_))
        ));
        assert!(matches!(
            tl.update_clip("video-1", "c1", &ClipPatch::bounds(1.0, 2.0)),
            Err(CoreError::TrackLocked(_))
        ));
        assert_eq!(tl, before);

        tl.update_track("video-1", TrackPatch { locked: Some(false), ..Default::default() })
            .unwrap();
        tl.remove_clip("video-1", "c1").unwrap();
    }

    // -- Remove / update -----------------------------------------------------

    #[test]
    fn remove_clip_recomputes_duration() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("c1", 0.0, 10.0, "a.mp4")).unwrap();
        tl.add_clip("audio-1", Clip::audio("c2", 5.0, 15.0, "a.wav")).unwrap();
        assert_eq!(tl.duration, 15.0);
        let removed = tl.remove_clip("audio-1", "c2").unwrap();
        assert_eq!(removed.id, "c2");
        assert_eq!(tl.duration, 10.0);
    }

    #[test]
    fn remove_clip_from_wrong_track_fails() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("c1", 0.0, 10.0, "a.mp4")).unwrap();
        assert!(matches!(
            tl.remove_clip("audio-1", "c1"),
            Err(CoreError::ClipNotFound(_))
        ));
        assert!(tl.has_clip_id("c1"));
    }

    #[test]
    fn update_clip_merges_fields() {
        let mut tl = make_test_timeline();
        tl.add_clip("text-1", Clip::text("t1", 0.0, 3.0, "Hello")).unwrap();
        let patch = ClipPatch {
            end: Some(4.0),
            text: Some("Bye".into()),
            style: Some(TextStylePatch {
                color: Some("red".into()),
                x: Some(140.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        tl.update_clip("text-1", "t1", &patch).unwrap();

        let (_, clip) = tl.find_clip("t1").unwrap();
        assert_eq!(clip.end, 4.0);
        match &clip.content {
            ClipContent::Text { text, style } => {
                assert_eq!(text, "Bye");
                assert_eq!(style.color, "red");
                assert_eq!(style.x, 100.0);
                assert_eq!(style.font_size, 24);
            }
            other => panic!("unexpected content {other:?}"),
        }
        assert_eq!(tl.duration, 4.0);
    }

    #[test]
    fn update_clip_invalid_result_leaves_clip_untouched() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("c1", 2.0, 6.0, "a.mp4")).unwrap();
        let before = tl.clone();
        let err = tl
            .update_clip("video-1", "c1", &ClipPatch { end: Some(1.0), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation(_)));
        assert_eq!(tl, before);
    }

    #[test]
    fn update_clip_can_clear_link() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("v", 0.0, 6.0, "a.mp4").linked_to("a"))
            .unwrap();
        let patch: ClipPatch = serde_json::from_str(r#"{"linkedId":null}"#).unwrap();
        tl.update_clip("video-1", "v", &patch).unwrap();
        assert!(tl.find_clip("v").unwrap().1.linked_id.is_none());
    }

    #[test]
    fn update_source_on_text_clip_rejected() {
        let mut tl = make_test_timeline();
        tl.add_clip("text-1", Clip::text("t1", 0.0, 3.0, "Hello")).unwrap();
        let patch = ClipPatch { source: Some("x.mp4".into()), ..Default::default() };
        assert!(matches!(
            tl.update_clip("text-1", "t1", &patch),
            Err(CoreError::InvalidOperation(_))
        ));
    }

    // -- Move ----------------------------------------------------------------

    #[test]
    fn move_within_track_updates_in_place() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("a", 0.0, 4.0, "a.mp4")).unwrap();
        tl.add_clip("video-1", Clip::video("b", 4.0, 10.0, "a.mp4")).unwrap();
        tl.move_clip("a", "video-1", "video-1", 2.0, 6.0).unwrap();

        assert_eq!(clip_ids(&tl, "video-1"), vec!["a", "b"]);
        let (_, a) = tl.find_clip("a").unwrap();
        assert_eq!((a.start, a.end), (2.0, 6.0));
        assert_eq!(tl.duration, 10.0);
    }

    #[test]
    fn move_across_tracks_is_remove_then_add() {
        let mut tl = make_test_timeline();
        let second = tl.add_track(TrackKind::Video);
        tl.add_clip("video-1", Clip::video("a", 0.0, 4.0, "a.mp4")).unwrap();
        tl.move_clip("a", "video-1", &second, 20.0, 24.0).unwrap();

        assert!(clip_ids(&tl, "video-1").is_empty());
        assert_eq!(clip_ids(&tl, &second), vec!["a"]);
        assert_eq!(tl.duration, 24.0);
    }

    #[test]
    fn move_missing_clip_leaves_timeline_unchanged() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("a", 0.0, 4.0, "a.mp4")).unwrap();
        let before = tl.clone();
        assert!(tl.move_clip("zzz", "video-1", "video-1", 1.0, 2.0).is_err());
        assert!(tl.move_clip("a", "audio-1", "video-1", 1.0, 2.0).is_err());
        assert_eq!(tl, before);
    }

    #[test]
    fn move_to_incompatible_track_leaves_clip_on_source() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("a", 0.0, 4.0, "a.mp4")).unwrap();
        let err = tl.move_clip("a", "video-1", "audio-1", 0.0, 4.0).unwrap_err();
        assert!(matches!(err, CoreError::IncompatibleTrack { .. }));
        assert_eq!(clip_ids(&tl, "video-1"), vec!["a"]);
        assert!(clip_ids(&tl, "audio-1").is_empty());
    }

    // -- Split ---------------------------------------------------------------

    #[test]
    fn split_produces_two_adjacent_segments() {
        let mut tl = make_test_timeline();
        let mut clip = Clip::video("c1", 0.0, 10.0, "a.mp4");
        clip.offset = 1.0;
        tl.add_clip("video-1", clip).unwrap();

        let outcome = tl.split_clip("video-1", "c1", 4.0).unwrap();
        assert_eq!(outcome.left, "c1-L");
        assert_eq!(outcome.right, "c1-R");
        assert!(!tl.has_clip_id("c1"));
        assert_eq!(clip_ids(&tl, "video-1"), vec!["c1-L", "c1-R"]);

        let (_, left) = tl.find_clip("c1-L").unwrap();
        let (_, right) = tl.find_clip("c1-R").unwrap();
        assert_eq!((left.start, left.end, left.offset), (0.0, 4.0, 1.0));
        assert_eq!((right.start, right.end, right.offset), (4.0, 10.0, 5.0));
        assert_eq!(tl.duration, 10.0);
    }

    #[test]
    fn replace_with_split_keeps_position() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("a", 0.0, 4.0, "a.mp4")).unwrap();
        tl.add_clip("video-1", Clip::video("b", 4.0, 8.0, "a.mp4")).unwrap();

        let left = Clip::video("a1", 0.0, 1.0, "a.mp4");
        let right = Clip::video("a2", 1.0, 4.0, "a.mp4");
        tl.replace_with_split("video-1", "a", left, right.clone())
            .unwrap();
        assert_eq!(clip_ids(&tl, "video-1"), ["a1", "a2", "b"]);

        let err = tl
            .replace_with_split("video-1", "a2", Clip::video("b", 1.0, 2.0, "a.mp4"), right)
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateClip(_)));
        assert_eq!(clip_ids(&tl, "video-1"), ["a1", "a2", "b"]);
    }

    #[test]
    fn split_at_boundary_or_outside_rejected() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("c1", 2.0, 6.0, "a.mp4")).unwrap();
        let before = tl.clone();
        for t in [2.0, 6.0, 0.0, 7.5] {
            assert!(matches!(
                tl.split_clip("video-1", "c1", t),
                Err(CoreError::InvalidOperation(_))
            ));
        }
        assert_eq!(tl, before);
    }

    #[test]
    fn split_linked_pair_symmetrically() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("v", 0.0, 10.0, "a.mp4").linked_to("a"))
            .unwrap();
        tl.add_clip("audio-1", Clip::audio("a", 0.0, 10.0, "a.mp4").linked_to("v"))
            .unwrap();

        let outcome = tl.split_clip("video-1", "v", 3.0).unwrap();
        let linked = outcome.linked.expect("partner should be split");
        assert_eq!(linked.left, "a-L");
        assert_eq!(linked.right, "a-R");

        let link_of = |id: &str| tl.find_clip(id).unwrap().1.linked_id.clone();
        assert_eq!(link_of("v-L").as_deref(), Some("a-L"));
        assert_eq!(link_of("a-L").as_deref(), Some("v-L"));
        assert_eq!(link_of("v-R").as_deref(), Some("a-R"));
        assert_eq!(link_of("a-R").as_deref(), Some("v-R"));
        assert_eq!(clip_ids(&tl, "audio-1"), vec!["a-L", "a-R"]);
    }

    #[test]
    fn split_with_partner_outside_range_relinks_left() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("v", 0.0, 10.0, "a.mp4").linked_to("a"))
            .unwrap();
        tl.add_clip("audio-1", Clip::audio("a", 0.0, 2.0, "a.mp4").linked_to("v"))
            .unwrap();

        let outcome = tl.split_clip("video-1", "v", 5.0).unwrap();
        assert!(outcome.linked.is_none());
        assert_eq!(outcome.relinked, Some(("audio-1".into(), "a".into())));
        assert_eq!(tl.find_clip("a").unwrap().1.linked_id.as_deref(), Some("v-L"));
        assert_eq!(tl.find_clip("v-L").unwrap().1.linked_id.as_deref(), Some("a"));
        assert!(tl.find_clip("v-R").unwrap().1.linked_id.is_none());
    }

    #[test]
    fn split_with_locked_partner_track_fails_whole_split() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("v", 0.0, 10.0, "a.mp4").linked_to("a"))
            .unwrap();
        tl.add_clip("audio-1", Clip::audio("a", 0.0, 10.0, "a.mp4").linked_to("v"))
            .unwrap();
        tl.update_track("audio-1", TrackPatch { locked: Some(true), ..Default::default() })
            .unwrap();
        let before = tl.clone();
        assert!(matches!(
            tl.split_clip("video-1", "v", 5.0),
            Err(CoreError::TrackLocked(_))
        ));
        assert_eq!(tl, before);
    }

    #[test]
    fn split_ids_get_suffix_when_taken() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("c1", 0.0, 10.0, "a.mp4")).unwrap();
        tl.add_clip("video-1", Clip::video("c1-L", 20.0, 30.0, "a.mp4")).unwrap();
        let outcome = tl.split_clip("video-1", "c1", 5.0).unwrap();
        assert_ne!(outcome.left, "c1-L");
        assert!(outcome.left.starts_with("c1-L-"));
        assert_eq!(outcome.right, "c1-R");
        assert_eq!(tl.clip_count(), 3);
    }

    // -- Tracks and queries --------------------------------------------------

    #[test]
    fn add_track_picks_smallest_free_suffix() {
        let mut tl = make_test_timeline();
        assert_eq!(tl.add_track(TrackKind::Audio), "audio-2");
        assert_eq!(tl.add_track(TrackKind::Audio), "audio-3");
        assert_eq!(tl.add_track(TrackKind::Text), "text-2");
        assert!(tl.insert_track("audio-2", TrackKind::Audio).is_err());
    }

    #[test]
    fn clips_at_uses_half_open_ranges() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("a", 0.0, 4.0, "a.mp4")).unwrap();
        tl.add_clip("video-1", Clip::video("b", 4.0, 8.0, "a.mp4")).unwrap();
        tl.add_clip("text-1", Clip::text("t", 3.0, 5.0, "x")).unwrap();

        let at: Vec<&str> = tl.clips_at(4.0).iter().map(|(_, c)| c.id.as_str()).collect();
        assert_eq!(at, vec!["b", "t"]);
    }

    #[test]
    fn duration_tracks_every_operation_in_sequence() {
        let mut tl = make_test_timeline();
        tl.add_clip("video-1", Clip::video("a", 0.0, 10.0, "a.mp4")).unwrap();
        assert_eq!(tl.duration, expected_duration(&tl));
        tl.add_clip("audio-1", Clip::audio("b", 3.0, 12.0, "a.wav")).unwrap();
        assert_eq!(tl.duration, expected_duration(&tl));
        tl.split_clip("audio-1", "b", 6.0).unwrap();
        assert_eq!(tl.duration, expected_duration(&tl));
        tl.move_clip("b-R", "audio-1", "audio-1", 6.0, 7.0).unwrap();
        assert_eq!(tl.duration, 10.0);
        tl.update_clip("video-1", "a", &ClipPatch::bounds(0.0, 2.0)).unwrap();
        assert_eq!(tl.duration, 7.0);
        tl.remove_clip("audio-1", "b-R").unwrap();
        assert_eq!(tl.duration, expected_duration(&tl));
        tl.remove_clip("audio-1", "b-L").unwrap();
        tl.remove_clip("video-1", "a").unwrap();
        assert_eq!(tl.duration, 0.0);
    }
}
