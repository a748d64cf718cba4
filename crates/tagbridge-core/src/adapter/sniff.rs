//! Container classification from leading magic bytes.
//!
//! Classification only. A match says nothing about whether the rest of the
//! file is well formed.

use crate::models::FormatLabel;

pub fn sniff(bytes: &[u8]) -> FormatLabel {
    if bytes.starts_with(b"ID3") {
        return FormatLabel::MP3;
    }
    if let [0xFF, b1, ..] = bytes {
        if b1 & 0xE0 == 0xE0 {
            return FormatLabel::MP3;
        }
    }
    if bytes.starts_with(b"fLaC") {
        return FormatLabel::FLAC;
    }
    if bytes.starts_with(b"OggS") {
        return FormatLabel::OGG;
    }
    if bytes.get(4..8) == Some(b"ftyp".as_slice()) {
        return FormatLabel::MP4;
    }
    if bytes.starts_with(b"RIFF") {
        return FormatLabel::WAV;
    }
    if bytes.starts_with(b"FORM") && bytes.get(8..12) == Some(b"AIFF".as_slice()) {
        return FormatLabel::AIFF;
    }
    FormatLabel::Unknown
}
