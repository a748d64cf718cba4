use serde::{Deserialize, Serialize};

/// Container family recognised from leading magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatLabel {
    MP3,
    FLAC,
    OGG,
    MP4,
    WAV,
    AIFF,
    Unknown,
}

impl FormatLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatLabel::MP3 => "MP3",
            FormatLabel::FLAC => "FLAC",
            FormatLabel::OGG => "OGG",
            FormatLabel::MP4 => "MP4",
            FormatLabel::WAV => "WAV",
            FormatLabel::AIFF => "AIFF",
            FormatLabel::Unknown => "Unknown",
        }
    }

    /// Parse an engine-reported format name. Anything unrecognised is `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "MP3" | "MPEG" => FormatLabel::MP3,
            "FLAC" => FormatLabel::FLAC,
            "OGG" | "OGGVORBIS" | "OGGOPUS" | "OPUS" => FormatLabel::OGG,
            "MP4" | "M4A" | "AAC" | "ALAC" => FormatLabel::MP4,
            "WAV" | "RIFF" => FormatLabel::WAV,
            "AIFF" | "AIF" => FormatLabel::AIFF,
            _ => FormatLabel::Unknown,
        }
    }
}

impl std::fmt::Display for FormatLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
