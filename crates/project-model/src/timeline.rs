//! Timeline: an ordered, contiguous snapshot of clips and their source files.
//!
//! Every mutating operation renumbers the clip sequence so that `order`
//! equals the clip's index and each clip starts exactly where the previous
//! one ends.

use serde::{Deserialize, Serialize};

use crate::clip::{Clip, ClipError, TrimDrag, DURATION_TOLERANCE};
use crate::media::SourceFile;

/// Clips plus the files they reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub files: Vec<SourceFile>,

    #[serde(default)]
    pub clips: Vec<Clip>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a timeline document from JSON and normalize clip positions.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut timeline: Timeline = serde_json::from_str(json)?;
        timeline.clips.sort_by_key(|c| c.order);
        timeline.renumber();
        Ok(timeline)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Register a source file. Replaces an existing file with the same id.
    pub fn add_file(&mut self, file: SourceFile) {
        match self.files.iter_mut().find(|f| f.id == file.id) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }

    pub fn file(&self, id: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn clip(&self, id: &str) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    fn clip_index(&self, id: &str) -> Result<usize, ClipError> {
        self.clips
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ClipError::UnknownClip {
                clip_id: id.to_string(),
            })
    }

    /// Append a clip at the end of the timeline.
    pub fn add_clip(&mut self, mut clip: Clip) -> Result<(), ClipError> {
        if self.file(&clip.file_id).is_none() {
            return Err(ClipError::UnknownFile {
                clip_id: clip.id,
                file_id: clip.file_id,
            });
        }
        clip.recompute_duration();
        clip.validate()?;
        clip.start_time = self.duration();
        clip.order = self.clips.len();
        self.clips.push(clip);
        Ok(())
    }

    /// Remove a clip and close the gap it leaves.
    pub fn remove_clip(&mut self, id: &str) -> Result<Clip, ClipError> {
        let index = self.clip_index(id)?;
        let removed = self.clips.remove(index);
        self.renumber();
        Ok(removed)
    }

    /// Move the clip at `from` so that it ends up at index `to`.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), ClipError> {
        let len = self.clips.len();
        for index in [from, to] {
            if index >= len {
                return Err(ClipError::IndexOutOfRange { index, len });
            }
        }
        let clip = self.clips.remove(from);
        self.clips.insert(to, clip);
        self.renumber();
        Ok(())
    }

    /// Change one clip's speed; its duration and all later positions follow.
    pub fn set_clip_speed(&mut self, id: &str, speed: Option<f64>) -> Result<(), ClipError> {
        if let Some(s) = speed {
            if !s.is_finite() || s <= 0.0 {
                return Err(ClipError::InvalidSpeed {
                    clip_id: id.to_string(),
                    speed: s,
                });
            }
        }
        let index = self.clip_index(id)?;
        self.clips[index].set_speed(speed);
        self.renumber();
        Ok(())
    }

    /// Apply a finished trim drag to its clip.
    pub fn commit_trim(&mut self, drag: &TrimDrag) -> Result<(), ClipError> {
        let index = self.clip_index(drag.clip_id())?;
        let (trim_start, trim_end) = drag.candidate();
        let clip = &mut self.clips[index];
        clip.set_trim(trim_start, trim_end);
        clip.validate()?;
        self.renumber();
        Ok(())
    }

    /// Reassign `order` and `start_time` from the current sequence.
    pub fn renumber(&mut self) {
        let mut cursor = 0.0;
        for (index, clip) in self.clips.iter_mut().enumerate() {
            clip.order = index;
            clip.start_time = cursor;
            cursor += clip.duration;
        }
    }

    /// Check per-clip invariants, contiguity, ordering and file references.
    pub fn validate(&self) -> Result<(), ClipError> {
        let mut expected_start = 0.0;
        for (index, clip) in self.clips.iter().enumerate() {
            clip.validate()?;
            if clip.order != index {
                return Err(ClipError::OrderMismatch {
                    clip_id: clip.id.clone(),
                    order: clip.order,
                    expected: index,
                });
            }
            if (clip.start_time - expected_start).abs() > DURATION_TOLERANCE {
                return Err(ClipError::NotContiguous {
                    clip_id: clip.id.clone(),
                    start_time: clip.start_time,
                    expected: expected_start,
                });
            }
            if self.file(&clip.file_id).is_none() {
                return Err(ClipError::UnknownFile {
                    clip_id: clip.id.clone(),
                    file_id: clip.file_id.clone(),
                });
            }
            expected_start = clip.end_time();
        }
        Ok(())
    }

    /// Total played-back duration, before any global speed.
    pub fn duration(&self) -> f64 {
        self.clips.iter().map(|c| c.duration).sum()
    }

    /// Duration of the rendered output at `global_speed`.
    pub fn output_duration(&self, global_speed: f64) -> f64 {
        if global_speed > 0.0 && global_speed.is_finite() {
            self.duration() / global_speed
        } else {
            self.duration()
        }
    }

    /// The clip showing at timeline time `time`.
    ///
    /// Returns the first clip whose `[start, start + duration)` contains
    /// `time`. Exactly at the timeline end the last clip is returned so the
    /// final frame stays visible; anything else outside the clips is `None`.
    pub fn clip_at(&self, time: f64) -> Option<&Clip> {
        if let Some(clip) = self.clips.iter().find(|c| c.contains(time)) {
            return Some(clip);
        }
        let last = self.clips.last()?;
        if (time - last.end_time()).abs() <= DURATION_TOLERANCE {
            Some(last)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Whether any clip changes playback speed.
    pub fn has_retimed_clips(&self) -> bool {
        self.clips.iter().any(Clip::is_retimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::TrimHandle;
    use crate::media::StorageRef;
    use proptest::prelude::*;

    fn timeline_with_files() -> Timeline {
        let mut timeline = Timeline::new();
        timeline.add_file(SourceFile::new("a", StorageRef::Key("aa01".into()), 60.0));
        timeline.add_file(SourceFile::new("b", StorageRef::Key("bb02".into()), 90.0));
        timeline
    }

    #[test]
    fn test_add_clip_appends_contiguously() {
        let mut timeline = timeline_with_files();
        timeline.add_clip(Clip::new("c1", "a", 0.0, 60.0, None)).unwrap();
        timeline.add_clip(Clip::new("c2", "b", 0.0, 90.0, None)).unwrap();

        assert_eq!(timeline.clips[1].start_time, 60.0);
        assert_eq!(timeline.clips[1].order, 1);
        assert_eq!(timeline.duration(), 150.0);
        assert_eq!(timeline.output_duration(2.0), 75.0);
        timeline.validate().unwrap();
    }

    #[test]
    fn test_add_clip_rejects_unknown_file() {
        let mut timeline = timeline_with_files();
        let err = timeline
            .add_clip(Clip::new("c1", "missing", 0.0, 1.0, None))
            .unwrap_err();
        assert!(matches!(err, ClipError::UnknownFile { .. }));
    }

    #[test]
    fn test_remove_and_reorder_renumber() {
        let mut timeline = timeline_with_files();
        timeline.add_clip(Clip::new("c1", "a", 0.0, 10.0, None)).unwrap();
        timeline.add_clip(Clip::new("c2", "b", 0.0, 20.0, None)).unwrap();
        timeline.add_clip(Clip::new("c3", "a", 10.0, 15.0, None)).unwrap();

        timeline.reorder(2, 0).unwrap();
        let ids: Vec<_> = timeline.clips.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c3", "c1", "c2"]);
        assert_eq!(timeline.clips[1].start_time, 5.0);
        timeline.validate().unwrap();

        timeline.remove_clip("c1").unwrap();
        assert_eq!(timeline.clips[1].start_time, 5.0);
        assert_eq!(timeline.clips[1].order, 1);
        timeline.validate().unwrap();

        assert!(matches!(
            timeline.reorder(0, 7),
            Err(ClipError::IndexOutOfRange { index: 7, len: 2 })
        ));
    }

    #[test]
    fn test_set_clip_speed_shifts_later_clips() {
        let mut timeline = timeline_with_files();
        timeline.add_clip(Clip::new("c1", "a", 0.0, 10.0, None)).unwrap();
        timeline.add_clip(Clip::new("c2", "b", 0.0, 10.0, None)).unwrap();

        timeline.set_clip_speed("c1", Some(2.0)).unwrap();
        assert_eq!(timeline.clips[0].duration, 5.0);
        assert_eq!(timeline.clips[1].start_time, 5.0);
        assert!(timeline.has_retimed_clips());
        assert!(timeline.set_clip_speed("c1", Some(-1.0)).is_err());
    }

    #[test]
    fn test_validate_detects_gap() {
        let mut timeline = timeline_with_files();
        timeline.add_clip(Clip::new("c1", "a", 0.0, 10.0, None)).unwrap();
        timeline.add_clip(Clip::new("c2", "b", 0.0, 10.0, None)).unwrap();
        timeline.clips[1].start_time = 11.0;
        assert!(matches!(
            timeline.validate(),
            Err(ClipError::NotContiguous { .. })
        ));
    }

    #[test]
    fn test_clip_at_boundaries() {
        let mut timeline = timeline_with_files();
        timeline.add_clip(Clip::new("c1", "a", 0.0, 10.0, None)).unwrap();
        timeline.add_clip(Clip::new("c2", "b", 0.0, 10.0, None)).unwrap();

        assert_eq!(timeline.clip_at(0.0).unwrap().id, "c1");
        assert_eq!(timeline.clip_at(10.0).unwrap().id, "c2");
        assert_eq!(timeline.clip_at(20.0).unwrap().id, "c2");
        assert!(timeline.clip_at(20.5).is_none());
        assert!(timeline.clip_at(-1.0).is_none());
        assert!(Timeline::new().clip_at(0.0).is_none());
    }

    #[test]
    fn test_trim_drag_commits_only_on_release() {
        let mut timeline = timeline_with_files();
        timeline.add_clip(Clip::new("c1", "a", 0.0, 10.0, None)).unwrap();
        timeline.add_clip(Clip::new("c2", "b", 0.0, 10.0, None)).unwrap();

        let mut drag = TrimDrag::begin(&timeline.clips[0], TrimHandle::End, 60.0);
        drag.update(-4.0);
        assert_eq!(timeline.clips[0].trim_end, 10.0);

        timeline.commit_trim(&drag).unwrap();
        assert_eq!(timeline.clips[0].trim_end, 6.0);
        assert_eq!(timeline.clips[1].start_time, 6.0);
        timeline.validate().unwrap();
    }

    #[test]
    fn test_json_round_trip_normalizes_positions() {
        let mut timeline = timeline_with_files();
        timeline.add_clip(Clip::new("c1", "a", 0.0, 10.0, None)).unwrap();
        timeline.add_clip(Clip::new("c2", "b", 0.0, 10.0, Some(2.0))).unwrap();
        let mut json: serde_json::Value = serde_json::from_str(&timeline.to_json().unwrap()).unwrap();
        json["clips"][1]["start_time"] = serde_json::json!(42.0);

        let loaded = Timeline::from_json(&json.to_string()).unwrap();
        assert_eq!(loaded.clips[1].start_time, 10.0);
        loaded.validate().unwrap();
    }

    proptest! {
        #[test]
        fn prop_renumber_keeps_timeline_contiguous(
            spans in proptest::collection::vec((0.1f64..100.0, 0.25f64..4.0), 1..12),
            moves in proptest::collection::vec((0usize..12, 0usize..12), 0..8),
        ) {
            let mut timeline = timeline_with_files();
            for (i, (span, speed)) in spans.iter().enumerate() {
                timeline
                    .add_clip(Clip::new(format!("c{i}"), "a", 0.0, *span, Some(*speed)))
                    .unwrap();
            }
            let len = timeline.clips.len();
            for (from, to) in moves {
                timeline.reorder(from % len, to % len).unwrap();
            }
            prop_assert!(timeline.validate().is_ok());
            let expected: f64 = spans.iter().map(|(span, speed)| span / speed).sum();
            prop_assert!((timeline.duration() - expected).abs() < 1e-6);
        }
    }
}
