//! Memory headroom checks run before a render starts.

use reelsmith_common::error::{ReelsmithError, ReelsmithResult};
use reelsmith_project_model::{ProcessingOptions, SourceFile};

/// Decoded frames the codec pipeline may hold at once across its channels.
pub const FRAME_BUFFER_DEPTH: u64 = 16;

/// Reports how much memory a render may use right now.
pub trait MemoryProbe: Send + Sync {
    fn available_bytes(&self) -> u64;
}

/// Samples available system memory through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> u64 {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        system.available_memory()
    }
}

/// Fixed figure, for tests and embedding.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> u64 {
        self.0
    }
}

/// Rough peak memory for rendering `files` into `output_duration_secs` of video.
///
/// Counts the decoded frame buffers at the largest frame size plus the
/// encoded output held in memory until the blob is returned.
pub fn estimate_required_bytes(
    files: &[&SourceFile],
    output_duration_secs: f64,
    options: &ProcessingOptions,
) -> u64 {
    let largest_frame = files
        .iter()
        .map(|f| i420_frame_bytes(f.width, f.height))
        .max()
        .unwrap_or(0);
    let target_frame = options
        .target_resolution
        .map(|r| r.frame_bytes())
        .unwrap_or(0);
    let frame_bytes = largest_frame.max(target_frame);

    let output_bytes =
        (output_duration_secs.max(0.0) * options.quality.bitrate_kbps() as f64 * 1000.0 / 8.0)
            as u64;

    FRAME_BUFFER_DEPTH * frame_bytes + output_bytes
}

/// Fail with `InsufficientMemory` when `required` exceeds what is available
/// or the configured ceiling.
pub fn check_headroom(required: u64, available: u64, ceiling: Option<u64>) -> ReelsmithResult<()> {
    let budget = match ceiling {
        Some(ceiling) => available.min(ceiling),
        None => available,
    };
    if required > budget {
        return Err(ReelsmithError::InsufficientMemory {
            required_bytes: required,
            available_bytes: budget,
        });
    }
    Ok(())
}

fn i420_frame_bytes(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * 3 / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsmith_common::error::ErrorKind;
    use reelsmith_project_model::{StorageRef, TargetResolution};

    #[test]
    fn test_estimate_uses_largest_frame() {
        let small = SourceFile::new("a", StorageRef::Key("a".into()), 10.0).with_dimensions(640, 360);
        let large = SourceFile::new("b", StorageRef::Key("b".into()), 10.0);
        let opts = ProcessingOptions::default();

        let estimate = estimate_required_bytes(&[&small, &large], 8.0, &opts);
        let frames = FRAME_BUFFER_DEPTH * 1920 * 1080 * 3 / 2;
        let output = 8 * 2_500 * 1000 / 8;
        assert_eq!(estimate, frames + output);
    }

    #[test]
    fn test_target_resolution_can_raise_estimate() {
        let small = SourceFile::new("a", StorageRef::Key("a".into()), 10.0).with_dimensions(640, 360);
        let opts = ProcessingOptions {
            target_resolution: Some(TargetResolution::new(3840, 2160)),
            ..Default::default()
        };
        let estimate = estimate_required_bytes(&[&small], 0.0, &opts);
        assert_eq!(estimate, FRAME_BUFFER_DEPTH * 3840 * 2160 * 3 / 2);
    }

    #[test]
    fn test_headroom_respects_ceiling() {
        assert!(check_headroom(100, 1_000, None).is_ok());
        let err = check_headroom(100, 1_000, Some(50)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientMemory);
        assert!(check_headroom(2_000, 1_000, Some(u64::MAX)).is_err());
    }
}
