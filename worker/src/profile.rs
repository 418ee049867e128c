//! Profile requests and their resolution into concrete encode parameters.
//!
//! A request either names a codec from the fixed table or describes one rung
//! of an encoding ladder. Resolution is a pure lookup; nothing here touches the
//! filesystem or spawns processes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ResolutionError;
use crate::options::{AudioCodec, Bitrate, EncodeSpec, Resolution, VideoCodec};

/// Codec names accepted by [`resolve`].
pub const SUPPORTED_CODECS: [&str; 4] = ["vp8", "vp9", "h265", "av1"];

pub const STANDARD_RESOLUTIONS: [&str; 4] = ["1920x1080", "1280x720", "854x480", "640x360"];
pub const STANDARD_BITRATES: [&str; 4] = ["8M", "4M", "2M", "1M"];

/// Resolution/bitrate pairs used when a caller asks for "the ladder".
pub const DEFAULT_LADDER: [(&str, &str); 4] = [
    ("1920x1080", "8M"),
    ("1280x720", "4M"),
    ("854x480", "2M"),
    ("640x360", "1M"),
];

const OUTPUT_EXTENSION: &str = "mp4";

/// One requested output variant.
///
/// Serialized untagged: a codec is a bare string (`"vp9"`), a rung is an
/// object (`{"resolution": "1280x720", "bitrate": "4M"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileRequest {
    Codec(String),
    Rung(LadderRung),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderRung {
    pub resolution: String,
    pub bitrate: String,
}

impl ProfileRequest {
    pub fn codec(name: impl Into<String>) -> Self {
        ProfileRequest::Codec(name.into())
    }

    pub fn rung(resolution: impl Into<String>, bitrate: impl Into<String>) -> Self {
        ProfileRequest::Rung(LadderRung {
            resolution: resolution.into(),
            bitrate: bitrate.into(),
        })
    }
}

impl fmt::Display for ProfileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileRequest::Codec(name) => f.write_str(name),
            ProfileRequest::Rung(rung) => write!(f, "{}@{}", rung.resolution, rung.bitrate),
        }
    }
}

/// Rungs built from every selected resolution paired with every selected
/// bitrate, resolution-major.
pub fn ladder_from_selection<R, B>(resolutions: &[R], bitrates: &[B]) -> Vec<ProfileRequest>
where
    R: AsRef<str>,
    B: AsRef<str>,
{
    resolutions
        .iter()
        .flat_map(|res| {
            bitrates
                .iter()
                .map(move |bit| ProfileRequest::rung(res.as_ref(), bit.as_ref()))
        })
        .collect()
}

/// A ladder requested as two lists instead of individual rungs.
///
/// An empty (or omitted) list selects every standard value for that axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderSelection {
    #[serde(default)]
    pub resolutions: Vec<String>,
    #[serde(default)]
    pub bitrates: Vec<String>,
}

impl LadderSelection {
    pub fn expand(&self) -> Vec<ProfileRequest> {
        let resolutions: Vec<&str> = if self.resolutions.is_empty() {
            STANDARD_RESOLUTIONS.to_vec()
        } else {
            self.resolutions.iter().map(String::as_str).collect()
        };
        let bitrates: Vec<&str> = if self.bitrates.is_empty() {
            STANDARD_BITRATES.to_vec()
        } else {
            self.bitrates.iter().map(String::as_str).collect()
        };
        ladder_from_selection(resolutions.as_slice(), bitrates.as_slice())
    }
}

pub fn default_ladder() -> Vec<ProfileRequest> {
    DEFAULT_LADDER
        .iter()
        .map(|(res, bit)| ProfileRequest::rung(*res, *bit))
        .collect()
}

/// Fixed codec conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecProfile {
    Vp8,
    Vp9,
    H265,
    Av1,
}

impl CodecProfile {
    /// Case-insensitive table lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "vp8" => Some(CodecProfile::Vp8),
            "vp9" => Some(CodecProfile::Vp9),
            "h265" => Some(CodecProfile::H265),
            "av1" => Some(CodecProfile::Av1),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecProfile::Vp8 => "vp8",
            CodecProfile::Vp9 => "vp9",
            CodecProfile::H265 => "h265",
            CodecProfile::Av1 => "av1",
        }
    }

    pub fn spec(self) -> EncodeSpec {
        let (video_codec, audio_codec, bitrate, crf, preset) = match self {
            CodecProfile::Vp8 => (VideoCodec::Vp8, AudioCodec::Vorbis, Some("1M"), None, None),
            CodecProfile::Vp9 => (VideoCodec::Vp9, AudioCodec::Opus, Some("1M"), None, None),
            CodecProfile::H265 => (VideoCodec::H265, AudioCodec::Aac, None, Some(28), Some("medium")),
            // -b:v 0 puts libaom into constant-quality mode.
            CodecProfile::Av1 => (VideoCodec::Av1, AudioCodec::Opus, Some("0"), Some(30), None),
        };
        EncodeSpec {
            video_codec,
            audio_codec: Some(audio_codec),
            bitrate: bitrate.map(Bitrate::from_static),
            crf,
            preset: preset.map(str::to_string),
            resolution: None,
            output_extension: OUTPUT_EXTENSION.to_string(),
        }
    }
}

/// A request together with everything derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub request: ProfileRequest,
    /// Filename component: codec name or `<resolution>_<bitrate>`.
    pub tag: String,
    /// Manifest key: codec name or `<height>p-<bitrate>`.
    pub label: String,
    pub spec: EncodeSpec,
}

/// Maps a request to its encode parameters.
pub fn resolve(request: &ProfileRequest) -> Result<EncodeSpec, ResolutionError> {
    resolve_profile(request).map(|resolved| resolved.spec)
}

pub fn resolve_profile(request: &ProfileRequest) -> Result<ResolvedProfile, ResolutionError> {
    match request {
        ProfileRequest::Codec(name) => {
            let codec = CodecProfile::from_name(name)
                .ok_or_else(|| ResolutionError::UnsupportedFormat(name.clone()))?;
            Ok(ResolvedProfile {
                request: request.clone(),
                tag: codec.name().to_string(),
                label: codec.name().to_string(),
                spec: codec.spec(),
            })
        }
        ProfileRequest::Rung(rung) => {
            let invalid = |reason: String| ResolutionError::InvalidRung {
                resolution: rung.resolution.clone(),
                bitrate: rung.bitrate.clone(),
                reason,
            };
            let resolution: Resolution = rung.resolution.parse().map_err(invalid)?;
            let bitrate: Bitrate = rung.bitrate.parse().map_err(invalid)?;
            Ok(ResolvedProfile {
                request: request.clone(),
                tag: format!("{}_{}", resolution, bitrate),
                label: format!("{}p-{}", resolution.height, bitrate),
                spec: EncodeSpec {
                    video_codec: VideoCodec::H264,
                    audio_codec: None,
                    bitrate: Some(bitrate),
                    crf: None,
                    preset: None,
                    resolution: Some(resolution),
                    output_extension: OUTPUT_EXTENSION.to_string(),
                },
            })
        }
    }
}

/// Resolves every request in order, stopping at the first that fails.
pub fn resolve_all(requests: &[ProfileRequest]) -> Result<Vec<ResolvedProfile>, ResolutionError> {
    requests.iter().map(resolve_profile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_table_matches_engine_contract() {
        let vp8 = resolve(&ProfileRequest::codec("vp8")).unwrap();
        assert_eq!(vp8.video_codec, VideoCodec::Vp8);
        assert_eq!(vp8.audio_codec, Some(AudioCodec::Vorbis));
        assert_eq!(vp8.bitrate.as_ref().map(Bitrate::as_str), Some("1M"));
        assert_eq!(vp8.crf, None);

        let vp9 = resolve(&ProfileRequest::codec("vp9")).unwrap();
        assert_eq!(vp9.video_codec, VideoCodec::Vp9);
        assert_eq!(vp9.audio_codec, Some(AudioCodec::Opus));
        assert_eq!(vp9.bitrate.as_ref().map(Bitrate::as_str), Some("1M"));

        let h265 = resolve(&ProfileRequest::codec("h265")).unwrap();
        assert_eq!(h265.video_codec, VideoCodec::H265);
        assert_eq!(h265.crf, Some(28));
        assert_eq!(h265.preset.as_deref(), Some("medium"));
        assert_eq!(h265.audio_codec, Some(AudioCodec::Aac));
        assert_eq!(h265.bitrate, None);

        let av1 = resolve(&ProfileRequest::codec("av1")).unwrap();
        assert_eq!(av1.video_codec, VideoCodec::Av1);
        assert_eq!(av1.crf, Some(30));
        assert_eq!(av1.bitrate.as_ref().map(Bitrate::as_str), Some("0"));
        assert_eq!(av1.audio_codec, Some(AudioCodec::Opus));
    }

    #[test]
    fn every_supported_codec_resolves() {
        for name in SUPPORTED_CODECS {
            let resolved = resolve_profile(&ProfileRequest::codec(name)).unwrap();
            assert_eq!(resolved.tag, name);
            assert_eq!(resolved.spec.output_extension, "mp4");
        }
    }

    #[test]
    fn codec_lookup_is_case_insensitive() {
        let resolved = resolve_profile(&ProfileRequest::codec("VP9")).unwrap();
        assert_eq!(resolved.tag, "vp9");
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        assert_eq!(
            resolve(&ProfileRequest::codec("vp10")),
            Err(ResolutionError::UnsupportedFormat("vp10".to_string()))
        );
    }

    #[test]
    fn rung_resolves_to_h264_with_passthrough_audio() {
        let resolved = resolve_profile(&ProfileRequest::rung("1280x720", "4M")).unwrap();
        assert_eq!(resolved.tag, "1280x720_4M");
        assert_eq!(resolved.label, "720p-4M");
        assert_eq!(resolved.spec.video_codec, VideoCodec::H264);
        assert_eq!(resolved.spec.audio_codec, None);
        assert_eq!(resolved.spec.crf, None);
        assert_eq!(
            resolved.spec.resolution,
            Some(Resolution { width: 1280, height: 720 })
        );
    }

    #[test]
    fn malformed_rung_is_rejected() {
        let err = resolve(&ProfileRequest::rung("hd", "4M")).unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidRung { .. }));
        let err = resolve(&ProfileRequest::rung("1280x720", "fast")).unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidRung { .. }));
    }

    #[test]
    fn resolve_all_stops_at_first_failure() {
        let requests = vec![
            ProfileRequest::codec("vp8"),
            ProfileRequest::codec("vp10"),
            ProfileRequest::codec("mpeg1"),
        ];
        assert_eq!(
            resolve_all(&requests),
            Err(ResolutionError::UnsupportedFormat("vp10".to_string()))
        );
    }

    #[test]
    fn ladder_selection_is_resolution_major() {
        let ladder = ladder_from_selection(&["1920x1080", "640x360"], &["8M", "1M"]);
        let shown: Vec<String> = ladder.iter().map(ToString::to_string).collect();
        assert_eq!(
            shown,
            ["1920x1080@8M", "1920x1080@1M", "640x360@8M", "640x360@1M"]
        );
    }

    #[test]
    fn empty_selection_axis_uses_standard_values() {
        let selection = LadderSelection {
            resolutions: vec!["1280x720".to_string()],
            bitrates: Vec::new(),
        };
        let shown: Vec<String> = selection.expand().iter().map(ToString::to_string).collect();
        assert_eq!(
            shown,
            ["1280x720@8M", "1280x720@4M", "1280x720@2M", "1280x720@1M"]
        );

        let everything = LadderSelection::default().expand();
        assert_eq!(everything.len(), STANDARD_RESOLUTIONS.len() * STANDARD_BITRATES.len());
        assert!(resolve_all(&everything).is_ok());
    }

    #[test]
    fn selection_deserializes_with_missing_axis() {
        let selection: LadderSelection =
            serde_json::from_str(r#"{"bitrates": ["2M"]}"#).unwrap();
        assert!(selection.resolutions.is_empty());
        assert_eq!(selection.expand().len(), STANDARD_RESOLUTIONS.len());
    }

    #[test]
    fn default_ladder_resolves() {
        let resolved = resolve_all(&default_ladder()).unwrap();
        let labels: Vec<&str> = resolved.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["1080p-8M", "720p-4M", "480p-2M", "360p-1M"]);
    }

    #[test]
    fn requests_deserialize_untagged() {
        let requests: Vec<ProfileRequest> =
            serde_json::from_str(r#"["vp8", {"resolution": "1280x720", "bitrate": "4M"}]"#)
                .unwrap();
        assert_eq!(
            requests,
            vec![ProfileRequest::codec("vp8"), ProfileRequest::rung("1280x720", "4M")]
        );
    }
}
