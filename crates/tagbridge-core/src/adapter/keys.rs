//! Canonical property keys.
//!
//! The public vocabulary is uppercase and format-agnostic. The engine's wire
//! documents use camelCase for the fields it knows. Unknown uppercase keys
//! are carried as-is in both directions.

use crate::error::{AdapterError, AdapterResult};
use crate::models::TagValue;

/// (canonical, wire) pairs.
const KEY_TABLE: &[(&str, &str)] = &[
    ("TITLE", "title"),
    ("ARTIST", "artist"),
    ("ALBUM", "album"),
    ("DATE", "year"),
    ("TRACKNUMBER", "track"),
    ("GENRE", "genre"),
    ("COMMENT", "comment"),
    ("ALBUMARTIST", "albumArtist"),
    ("COMPOSER", "composer"),
    ("DISCNUMBER", "disc"),
    ("BPM", "bpm"),
    ("COPYRIGHT", "copyright"),
    ("ENCODEDBY", "encodedBy"),
    ("LYRICS", "lyrics"),
    ("CONDUCTOR", "conductor"),
    ("LYRICIST", "lyricist"),
    ("LABEL", "label"),
    ("ISRC", "isrc"),
    ("COMPILATION", "compilation"),
    ("TITLESORT", "titleSort"),
    ("ARTISTSORT", "artistSort"),
    ("ALBUMSORT", "albumSort"),
    ("ALBUMARTISTSORT", "albumArtistSort"),
    ("REPLAYGAIN_TRACK_GAIN", "replayGainTrackGain"),
    ("REPLAYGAIN_TRACK_PEAK", "replayGainTrackPeak"),
    ("REPLAYGAIN_ALBUM_GAIN", "replayGainAlbumGain"),
    ("REPLAYGAIN_ALBUM_PEAK", "replayGainAlbumPeak"),
    ("MUSICBRAINZ_TRACKID", "musicbrainzTrackId"),
    ("MUSICBRAINZ_ALBUMID", "musicbrainzReleaseId"),
    ("MUSICBRAINZ_ARTISTID", "musicbrainzArtistId"),
    ("MUSICBRAINZ_ALBUMARTISTID", "musicbrainzReleaseArtistId"),
    ("MUSICBRAINZ_RELEASEGROUPID", "musicbrainzReleaseGroupId"),
    ("ACOUSTID_ID", "acoustidId"),
    ("ACOUSTID_FINGERPRINT", "acoustidFingerprint"),
];

/// Integer-valued on the wire.
const NUMERIC_KEYS: &[&str] = &["DATE", "TRACKNUMBER", "DISCNUMBER", "BPM"];

/// Audio-property wire keys. Never part of the property map.
pub const AUDIO_KEYS: &[&str] = &[
    "length",
    "lengthMs",
    "bitrate",
    "sampleRate",
    "channels",
    "bitsPerSample",
    "sampleFrames",
    "codec",
    "containerFormat",
    "isLossless",
];

/// Structural and derived document keys.
pub const STRUCTURAL_KEYS: &[&str] = &["pictures", "ratings", "hasArtwork", "pictureCount"];

pub fn to_wire(canonical: &str) -> Option<&'static str> {
    KEY_TABLE
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(canonical))
        .map(|(_, w)| *w)
}

pub fn from_wire(wire: &str) -> Option<&'static str> {
    KEY_TABLE.iter().find(|(_, w)| *w == wire).map(|(c, _)| *c)
}

/// Canonical form of a caller-supplied key: table names (either spelling)
/// resolve to the table entry, anything else is uppercased.
pub fn canonicalize(key: &str) -> String {
    let key = key.trim();
    if let Some((c, _)) = KEY_TABLE
        .iter()
        .find(|(c, w)| c.eq_ignore_ascii_case(key) || w.eq_ignore_ascii_case(key))
    {
        return (*c).to_string();
    }
    key.to_ascii_uppercase()
}

/// Whether a wire key is carried as a property without a table entry:
/// anything [`canonicalize`] could have produced.
pub fn is_verbatim_property(wire: &str) -> bool {
    !wire.trim().is_empty() && !wire.chars().any(|c| c.is_ascii_lowercase())
}

/// Audio and structural keys, compared without case or underscores so that
/// `SAMPLE_RATE`, `SAMPLERATE` and `sampleRate` are all caught.
pub fn is_reserved(key: &str) -> bool {
    let folded = fold(key);
    AUDIO_KEYS.iter().chain(STRUCTURAL_KEYS).any(|k| fold(k) == folded)
}

/// Canonical key for a mutation, or `ReservedKey`.
pub fn settable(key: &str) -> AdapterResult<String> {
    if key.trim().is_empty() || is_reserved(key) {
        return Err(AdapterError::ReservedKey(key.to_string()));
    }
    Ok(canonicalize(key))
}

/// Typed value for a text assignment. Numeric keys become integers only when
/// the text is exactly the integer's rendering, so reading back is lossless.
pub fn value_for(canonical: &str, text: &str) -> TagValue {
    if NUMERIC_KEYS.contains(&canonical) {
        if let Ok(n) = text.parse::<i64>() {
            if n != 0 && n.to_string() == text {
                return TagValue::Integer(n);
            }
        }
    }
    TagValue::Text(text.to_string())
}

fn fold(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_bijective() {
        for (canonical, wire) in KEY_TABLE {
            assert_eq!(to_wire(canonical), Some(*wire));
            assert_eq!(from_wire(wire), Some(*canonical));
        }
    }

    #[test]
    fn canonicalize_never_yields_camel_case() {
        assert_eq!(canonicalize("albumArtist"), "ALBUMARTIST");
        assert_eq!(canonicalize("albumartist"), "ALBUMARTIST");
        assert_eq!(canonicalize("replayGainTrackGain"), "REPLAYGAIN_TRACK_GAIN");
        assert_eq!(canonicalize("myVendorField"), "MYVENDORFIELD");
        assert_eq!(canonicalize("CUSTOM_THING"), "CUSTOM_THING");
    }

    #[test]
    fn audio_keys_are_reserved() {
        for key in ["bitrate", "SAMPLE_RATE", "SampleRate", "isLossless", "PICTURES"] {
            assert!(is_reserved(key), "{key}");
            assert!(matches!(settable(key), Err(AdapterError::ReservedKey(_))));
        }
        assert!(!is_reserved("TITLE"));
    }

    #[test]
    fn verbatim_property_detection() {
        assert!(is_verbatim_property("MY_TAG"));
        assert!(is_verbatim_property("ITUNES:CDDB_1"));
        assert!(!is_verbatim_property("vendorBlob"));
        assert!(is_verbatim_property("123"));
        assert!(!is_verbatim_property(""));
        assert!(!is_verbatim_property("   "));
    }

    #[test]
    fn numeric_keys_coerce() {
        assert_eq!(value_for("DATE", "1999"), TagValue::Integer(1999));
        assert_eq!(value_for("DATE", "1999-01-02"), TagValue::Text("1999-01-02".into()));
        assert_eq!(value_for("DATE", "0042"), TagValue::Text("0042".into()));
        assert_eq!(value_for("TITLE", "42"), TagValue::Text("42".into()));
    }
}
