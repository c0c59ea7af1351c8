//! ffmpeg argument construction and failure classification.

use std::path::Path;

use reelsmith_common::error::ReelsmithError;
use reelsmith_project_model::{OutputFormat, QualityPreset};

/// Speeds this close to 1 are treated as unchanged.
const UNIT_SPEED_EPSILON: f64 = 1e-9;

/// Extension of trimmed parts. Matroska accepts any copied codec, so a
/// VP8 or AV1 source survives a unit-speed trim.
pub const PART_EXTENSION: &str = "mkv";

/// Which container operation produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Trim,
    Concat,
    Transcode,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Trim => "trim",
            Stage::Concat => "concat",
            Stage::Transcode => "transcode",
        }
    }
}

fn is_unit_speed(speed: f64) -> bool {
    (speed - 1.0).abs() <= UNIT_SPEED_EPSILON
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn secs_arg(secs: f64) -> String {
    format!("{:.6}", secs.max(0.0))
}

fn common_prefix() -> Vec<String> {
    ["-hide_banner", "-nostdin", "-y", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn progress_suffix(output: &Path) -> Vec<String> {
    vec![
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        path_arg(output),
    ]
}

/// H.264 settings used for every intermediate file.
fn h264_args(quality: QualityPreset) -> Vec<String> {
    vec![
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        quality.x264_preset().to_string(),
        "-crf".to_string(),
        quality.h264_crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-profile:v".to_string(),
        "main".to_string(),
    ]
}

/// Extract `[start, end)` of `input`.
///
/// At unit speed the video stream is copied untouched. Otherwise it is
/// re-encoded with `setpts=PTS/speed`. Audio is dropped either way so every
/// part reaches the concat demuxer with the same single-stream layout.
pub fn trim_args(input: &Path, start_secs: f64, end_secs: f64, speed: f64, output: &Path) -> Vec<String> {
    let mut args = common_prefix();
    args.extend([
        "-ss".to_string(),
        secs_arg(start_secs),
        "-t".to_string(),
        secs_arg(end_secs - start_secs),
        "-i".to_string(),
        path_arg(input),
    ]);
    if is_unit_speed(speed) {
        args.extend([
            "-map".to_string(),
            "0:v:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-an".to_string(),
            "-avoid_negative_ts".to_string(),
            "make_zero".to_string(),
        ]);
    } else {
        args.extend([
            "-vf".to_string(),
            format!("setpts=PTS/{speed}"),
            "-an".to_string(),
        ]);
        args.extend(h264_args(QualityPreset::Medium));
    }
    args.extend(progress_suffix(output));
    args
}

/// Render the concat demuxer's list file.
pub fn concat_list(parts: &[&Path]) -> String {
    parts
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

/// Join the files named in `list`, apply the global speed, drop audio.
///
/// The result is always MP4 at [`QualityPreset::Medium`].
pub fn concat_args(list: &Path, global_speed: f64, output: &Path) -> Vec<String> {
    let mut args = common_prefix();
    args.extend([
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        path_arg(list),
    ]);
    if !is_unit_speed(global_speed) {
        args.extend(["-vf".to_string(), format!("setpts=PTS/{global_speed}")]);
    }
    args.push("-an".to_string());
    args.extend(h264_args(QualityPreset::Medium));
    args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    args.extend(progress_suffix(output));
    args
}

/// Re-encode `input` into `format` at `quality`.
pub fn transcode_args(
    input: &Path,
    format: OutputFormat,
    quality: QualityPreset,
    output: &Path,
) -> Vec<String> {
    let mut args = common_prefix();
    args.extend(["-i".to_string(), path_arg(input), "-an".to_string()]);
    match format {
        OutputFormat::Mp4 => {
            args.extend(h264_args(quality));
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }
        OutputFormat::Webm => args.extend([
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-crf".to_string(),
            quality.vpx_crf().to_string(),
            "-b:v".to_string(),
            "0".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]),
    }
    args.extend(progress_suffix(output));
    args
}

/// Last non-empty stderr line, which is where ffmpeg puts the cause.
fn last_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("ffmpeg exited with an error")
}

/// Map ffmpeg's stderr to an error kind.
pub fn classify_failure(stage: Stage, clip_id: Option<&str>, stderr: &str) -> ReelsmithError {
    let lower = stderr.to_ascii_lowercase();
    let detail = last_line(stderr).to_string();

    if lower.contains("invalid data found") || lower.contains("moov atom not found") {
        return ReelsmithError::corrupted(detail);
    }
    if lower.contains("unknown encoder")
        || lower.contains("unknown decoder")
        || lower.contains("decoder not found")
        || lower.contains("encoder not found")
    {
        return ReelsmithError::unsupported_format(detail);
    }
    if lower.contains("no space left") {
        return ReelsmithError::StorageQuotaExceeded { message: detail };
    }
    if lower.contains("permission denied") {
        return ReelsmithError::StorageAccessDenied { message: detail };
    }
    match stage {
        Stage::Trim => ReelsmithError::trim(clip_id.unwrap_or("unknown"), detail),
        Stage::Concat => ReelsmithError::concat(detail),
        Stage::Transcode => ReelsmithError::transcode(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsmith_common::error::ErrorKind;
    use std::path::PathBuf;

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_unit_speed_trim_copies_video_only() {
        let args = trim_args(Path::new("in.mp4"), 2.0, 7.5, 1.0, Path::new("out.mkv"));
        assert!(has_pair(&args, "-ss", "2.000000"));
        assert!(has_pair(&args, "-t", "5.500000"));
        assert!(has_pair(&args, "-map", "0:v:0"));
        assert!(has_pair(&args, "-c:v", "copy"));
        assert!(args.iter().any(|a| a == "-an"));
        assert_eq!(args.last().map(String::as_str), Some("out.mkv"));
    }

    #[test]
    fn test_unit_speed_webm_trim_lands_in_matroska() {
        let output = PathBuf::from(format!("/tmp/trim-0000.{PART_EXTENSION}"));
        let args = trim_args(Path::new("/media/clip.webm"), 0.0, 60.0, 1.0, &output);
        assert!(has_pair(&args, "-c:v", "copy"));
        assert!(!args.iter().any(|a| a == "libx264"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/trim-0000.mkv"));
    }

    #[test]
    fn test_copied_and_reencoded_parts_share_stream_layout() {
        let copied = trim_args(Path::new("a.webm"), 0.0, 5.0, 1.0, Path::new("a.mkv"));
        let retimed = trim_args(Path::new("b.mp4"), 0.0, 5.0, 1.5, Path::new("b.mkv"));
        for args in [&copied, &retimed] {
            assert!(args.iter().any(|a| a == "-an"));
        }
    }

    #[test]
    fn test_retimed_trim_reencodes_without_audio() {
        let args = trim_args(Path::new("in.mp4"), 0.0, 10.0, 2.0, Path::new("out.mp4"));
        assert!(has_pair(&args, "-vf", "setpts=PTS/2"));
        assert!(args.iter().any(|a| a == "-an"));
        assert!(has_pair(&args, "-pix_fmt", "yuv420p"));
        assert!(has_pair(&args, "-profile:v", "main"));
        assert!(!args.iter().any(|a| a == "copy"));
    }

    #[test]
    fn test_concat_always_drops_audio() {
        let args = concat_args(Path::new("list.txt"), 1.0, Path::new("joined.mp4"));
        assert!(has_pair(&args, "-f", "concat"));
        assert!(has_pair(&args, "-safe", "0"));
        assert!(args.iter().any(|a| a == "-an"));
        assert!(!args.iter().any(|a| a.starts_with("setpts")));

        let args = concat_args(Path::new("list.txt"), 1.5, Path::new("joined.mp4"));
        assert!(has_pair(&args, "-vf", "setpts=PTS/1.5"));
    }

    #[test]
    fn test_transcode_quality_mapping() {
        let mp4 = transcode_args(
            Path::new("in.mp4"),
            OutputFormat::Mp4,
            QualityPreset::High,
            Path::new("out.mp4"),
        );
        assert!(has_pair(&mp4, "-preset", QualityPreset::High.x264_preset()));
        assert!(has_pair(&mp4, "-crf", &QualityPreset::High.h264_crf().to_string()));

        let webm = transcode_args(
            Path::new("in.mp4"),
            OutputFormat::Webm,
            QualityPreset::Low,
            Path::new("out.webm"),
        );
        assert!(has_pair(&webm, "-c:v", "libvpx-vp9"));
        assert!(has_pair(&webm, "-b:v", "0"));
    }

    #[test]
    fn test_concat_list_quotes_paths() {
        let a = PathBuf::from("/tmp/a.mp4");
        let b = PathBuf::from("/tmp/it's.mp4");
        let list = concat_list(&[a.as_path(), b.as_path()]);
        assert_eq!(list, "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'\n");
    }

    #[test]
    fn test_classify_failure() {
        let corrupt = classify_failure(Stage::Trim, Some("c1"), "x\nmoov atom not found\n");
        assert_eq!(corrupt.kind(), ErrorKind::CorruptedFile);

        let codec = classify_failure(Stage::Transcode, None, "Unknown encoder 'libvpx-vp9'");
        assert_eq!(codec.kind(), ErrorKind::UnsupportedFormat);

        let full = classify_failure(Stage::Concat, None, "write: No space left on device");
        assert_eq!(full.kind(), ErrorKind::StorageQuotaExceeded);

        let denied = classify_failure(Stage::Concat, None, "out.mp4: Permission denied");
        assert_eq!(denied.kind(), ErrorKind::StorageAccessDenied);

        let generic = classify_failure(Stage::Trim, Some("c7"), "Conversion failed!\n\n");
        assert_eq!(generic.kind(), ErrorKind::TrimFailed);
        assert!(generic.to_string().contains("Conversion failed!"));
    }
}
