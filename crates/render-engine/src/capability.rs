//! Capability probing for the frame-level engine.
//!
//! The codec pipeline needs every primitive at once: a frame decoder, a frame
//! encoder, an audio decoder, an audio encoder, and the carriers that move
//! chunks and frames between the application and GStreamer. Partial support
//! counts as no support.

use std::sync::Arc;

use reelsmith_common::config::RenderDefaults;
use serde::Serialize;

/// Environment variable carrying the deployment default for the frame engine.
pub const FRAME_ENGINE_ENV: &str = "REELSMITH_FRAME_ENGINE";

/// A frame-level primitive the codec pipeline relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    VideoDecoder,
    VideoEncoder,
    AudioDecoder,
    AudioEncoder,
    /// Feeds application buffers into a pipeline (`appsrc`).
    ChunkCarrier,
    /// Hands decoded frames back to the application (`appsink`).
    FrameCarrier,
    Muxer,
}

impl Primitive {
    pub const ALL: [Primitive; 7] = [
        Primitive::VideoDecoder,
        Primitive::VideoEncoder,
        Primitive::AudioDecoder,
        Primitive::AudioEncoder,
        Primitive::ChunkCarrier,
        Primitive::FrameCarrier,
        Primitive::Muxer,
    ];

    /// Element names that satisfy this primitive; any one is enough.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Primitive::VideoDecoder => &["avdec_h264", "openh264dec", "vp8dec"],
            Primitive::VideoEncoder => &["x264enc", "vp8enc"],
            Primitive::AudioDecoder => &["avdec_aac", "faad", "opusdec"],
            Primitive::AudioEncoder => &["avenc_aac", "fdkaacenc", "opusenc"],
            Primitive::ChunkCarrier => &["appsrc"],
            Primitive::FrameCarrier => &["appsink"],
            Primitive::Muxer => &["mp4mux", "webmmux"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Primitive::VideoDecoder => "video_decoder",
            Primitive::VideoEncoder => "video_encoder",
            Primitive::AudioDecoder => "audio_decoder",
            Primitive::AudioEncoder => "audio_encoder",
            Primitive::ChunkCarrier => "chunk_carrier",
            Primitive::FrameCarrier => "frame_carrier",
            Primitive::Muxer => "muxer",
        }
    }
}

/// Answers whether a named element is available.
pub trait ToolProbe: Send + Sync {
    fn has_element(&self, name: &str) -> bool;
}

/// Looks elements up in the GStreamer registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct GstToolProbe;

impl ToolProbe for GstToolProbe {
    fn has_element(&self, name: &str) -> bool {
        if crate::codec::gst::init_gstreamer().is_err() {
            return false;
        }
        gstreamer::ElementFactory::find(name).is_some()
    }
}

/// Which layer decided the feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
    JobOverride,
    UserPreference,
    Environment,
    BuiltIn,
}

/// Enablement of the frame-level engine, resolved in priority order:
/// job override, persisted preference, environment default, built-in (on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlag {
    pub preference: Option<bool>,
    pub environment: Option<bool>,
}

impl FeatureFlag {
    pub fn new(preference: Option<bool>, environment: Option<bool>) -> Self {
        Self {
            preference,
            environment,
        }
    }

    /// Preference from config, default from `REELSMITH_FRAME_ENGINE`.
    pub fn from_config(render: &RenderDefaults) -> Self {
        let environment = std::env::var(FRAME_ENGINE_ENV)
            .ok()
            .and_then(|v| parse_flag(&v));
        Self::new(render.frame_engine, environment)
    }

    pub fn resolve(&self, job_override: Option<bool>) -> (bool, FlagSource) {
        if let Some(v) = job_override {
            return (v, FlagSource::JobOverride);
        }
        if let Some(v) = self.preference {
            return (v, FlagSource::UserPreference);
        }
        if let Some(v) = self.environment {
            return (v, FlagSource::Environment);
        }
        (true, FlagSource::BuiltIn)
    }
}

impl Default for FeatureFlag {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Parse a boolean-ish flag value.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" | "enabled" => Some(true),
        "0" | "false" | "off" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

/// Outcome of a capability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityReport {
    pub flag_enabled: bool,
    pub flag_source: FlagSource,
    pub missing: Vec<Primitive>,
}

impl CapabilityReport {
    /// True only when enabled and every primitive is present.
    pub fn supported(&self) -> bool {
        self.flag_enabled && self.missing.is_empty()
    }

    /// Human-readable reason when unsupported.
    pub fn reason(&self) -> Option<String> {
        if !self.flag_enabled {
            return Some(format!("frame engine disabled ({:?})", self.flag_source));
        }
        if !self.missing.is_empty() {
            let names: Vec<_> = self.missing.iter().map(|p| p.as_str()).collect();
            return Some(format!("missing primitives: {}", names.join(", ")));
        }
        None
    }
}

/// Probes the runtime for the frame-level primitives.
#[derive(Clone)]
pub struct CapabilityProber {
    probe: Arc<dyn ToolProbe>,
    flag: FeatureFlag,
}

impl std::fmt::Debug for CapabilityProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProber")
            .field("flag", &self.flag)
            .finish_non_exhaustive()
    }
}

impl CapabilityProber {
    pub fn new(probe: Arc<dyn ToolProbe>, flag: FeatureFlag) -> Self {
        Self { probe, flag }
    }

    /// GStreamer registry lookup with the flag resolved from config and env.
    pub fn from_config(render: &RenderDefaults) -> Self {
        Self::new(Arc::new(GstToolProbe), FeatureFlag::from_config(render))
    }

    pub fn probe(&self, job_override: Option<bool>) -> CapabilityReport {
        let (flag_enabled, flag_source) = self.flag.resolve(job_override);
        let missing = if flag_enabled {
            Primitive::ALL
                .into_iter()
                .filter(|p| !p.candidates().iter().any(|e| self.probe.has_element(e)))
                .collect()
        } else {
            Vec::new()
        };
        let report = CapabilityReport {
            flag_enabled,
            flag_source,
            missing,
        };
        tracing::debug!(
            supported = report.supported(),
            source = ?report.flag_source,
            missing = ?report.missing,
            "Frame engine capability probe"
        );
        report
    }
}
