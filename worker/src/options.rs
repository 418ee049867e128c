use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Video encoders the resolver can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Vp8,
    Vp9,
    H264,
    H265,
    Av1,
}

impl VideoCodec {
    /// Encoder name understood by the external engine (`-c:v`).
    pub fn encoder_name(self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "libvpx",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Av1 => "libaom-av1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Vorbis,
    Opus,
    Aac,
}

impl AudioCodec {
    /// Encoder name understood by the external engine (`-c:a`).
    pub fn encoder_name(self) -> &'static str {
        match self {
            AudioCodec::Vorbis => "libvorbis",
            AudioCodec::Opus => "libopus",
            AudioCodec::Aac => "aac",
        }
    }
}

/// Frame size as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
        let width: u32 = w.parse().map_err(|_| format!("invalid width {:?}", w))?;
        let height: u32 = h.parse().map_err(|_| format!("invalid height {:?}", h))?;
        if width == 0 || height == 0 {
            return Err("width and height must be positive".to_string());
        }
        Ok(Resolution { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A bitrate in the engine's notation: digits with an optional `k` or `M`
/// suffix, e.g. `4M`, `500k`, `0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bitrate(String);

impl Bitrate {
    pub(crate) fn from_static(s: &'static str) -> Self {
        Bitrate(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Bitrate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_suffix(|c: char| matches!(c, 'k' | 'K' | 'm' | 'M'))
            .unwrap_or(s);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("expected digits with optional k/M suffix, got {:?}", s));
        }
        Ok(Bitrate(s.to_string()))
    }
}

impl TryFrom<String> for Bitrate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Bitrate> for String {
    fn from(b: Bitrate) -> Self {
        b.0
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully resolved encode parameters for one output.
///
/// Built only by [`crate::profile::resolve`]; every field the chosen codec
/// needs is filled in there, so nothing falls back to engine defaults
/// silently. `audio_codec: None` means the engine's default audio handling is
/// left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSpec {
    pub video_codec: VideoCodec,
    pub audio_codec: Option<AudioCodec>,
    pub bitrate: Option<Bitrate>,
    pub crf: Option<u8>,
    pub preset: Option<String>,
    pub resolution: Option<Resolution>,
    pub output_extension: String,
}

impl EncodeSpec {
    /// Engine arguments for this spec, excluding input/output paths.
    pub fn encoder_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.video_codec.encoder_name().to_string()];
        if let Some(crf) = self.crf {
            args.push("-crf".to_string());
            args.push(crf.to_string());
        }
        if let Some(bitrate) = &self.bitrate {
            args.push("-b:v".to_string());
            args.push(bitrate.to_string());
        }
        if let Some(preset) = &self.preset {
            args.push("-preset".to_string());
            args.push(preset.clone());
        }
        if let Some(resolution) = self.resolution {
            args.push("-s".to_string());
            args.push(resolution.to_string());
        }
        if let Some(audio) = self.audio_codec {
            args.push("-c:a".to_string());
            args.push(audio.encoder_name().to_string());
        }
        args
    }
}
