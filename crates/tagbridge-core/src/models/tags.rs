//! Canonical tag document.
//!
//! Property keys are always canonical uppercase (`ALBUMARTIST`, never
//! `albumArtist`). Audio properties live in their own typed struct and never
//! appear in the property map.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::adapter::keys;

/// One value of a multi-valued property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl TagValue {
    /// Text rendering, as exposed through the string property API.
    pub fn to_text(&self) -> String {
        match self {
            TagValue::Text(s) => s.clone(),
            TagValue::Integer(n) => n.to_string(),
            TagValue::Float(f) => f.to_string(),
        }
    }

    /// The engine's "no value" sentinels: empty strings and integer zero.
    pub fn is_absent(&self) -> bool {
        match self {
            TagValue::Text(s) => s.is_empty(),
            TagValue::Integer(n) => *n == 0,
            TagValue::Float(_) => false,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            TagValue::Integer(n) => u32::try_from(*n).ok(),
            TagValue::Float(_) => None,
            TagValue::Text(s) => leading_number(s),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Text(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Text(s)
    }
}

impl From<i64> for TagValue {
    fn from(n: i64) -> Self {
        TagValue::Integer(n)
    }
}

/// Embedded artwork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Picture {
    pub mime_type: String,
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub data: Vec<u8>,
    /// APIC-style type code (3 = front cover).
    pub picture_type: u32,
    pub description: String,
}

/// Normalized 0.0–1.0 rating with an optional rater identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub value: f64,
    pub email: Option<String>,
    pub counter: u32,
}

/// Stream properties reported by the engine. Read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioProperties {
    /// Seconds.
    pub length: u32,
    pub length_ms: u32,
    /// kbit/s.
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: u32,
    /// Only engines that count frames report this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_frames: Option<u64>,
    pub codec: String,
    pub container_format: String,
    pub is_lossless: bool,
}

/// Everything one engine read produces for a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagData {
    pub properties: BTreeMap<String, Vec<TagValue>>,
    pub pictures: Vec<Picture>,
    pub ratings: Vec<Rating>,
    pub audio: Option<AudioProperties>,
    /// Wire entries the codec did not recognise, in document order.
    #[serde(skip)]
    pub passthrough: Vec<(String, rmpv::Value)>,
}

impl TagData {
    pub fn first_text(&self, key: &str) -> Option<String> {
        self.properties
            .get(key)
            .and_then(|values| values.first())
            .map(TagValue::to_text)
    }

    /// Replace `key` with `values`; an empty list removes it. The key is
    /// canonicalized first. Empty and reserved keys are ignored.
    pub fn set_values(&mut self, key: &str, values: Vec<TagValue>) {
        let key = keys::canonicalize(key);
        if key.is_empty() || keys::is_reserved(&key) {
            log::debug!("tagbridge: ignoring property key {:?}", key);
            return;
        }
        if values.is_empty() {
            self.properties.remove(&key);
        } else {
            self.properties.insert(key, values);
        }
    }

    /// Text view of the property map.
    pub fn text_properties(&self) -> BTreeMap<String, Vec<String>> {
        self.properties
            .iter()
            .map(|(k, values)| (k.clone(), values.iter().map(TagValue::to_text).collect()))
            .collect()
    }
}

/// Basic fields, the lowest common denominator across tag formats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub comment: String,
    pub genre: String,
    /// 0 = unset.
    pub year: u32,
    /// 0 = unset.
    pub track: u32,
}

impl Tag {
    pub fn from_data(data: &TagData) -> Self {
        let text = |key: &str| data.first_text(key).unwrap_or_default();
        let number = |key: &str| {
            data.properties
                .get(key)
                .and_then(|values| values.first())
                .and_then(TagValue::as_u32)
                .unwrap_or(0)
        };
        Self {
            title: text("TITLE"),
            artist: text("ARTIST"),
            album: text("ALBUM"),
            comment: text("COMMENT"),
            genre: text("GENRE"),
            year: number("DATE"),
            track: number("TRACKNUMBER"),
        }
    }

    /// Write the basic fields into `data`. Empty strings and zeros remove.
    pub fn apply_to(&self, data: &mut TagData) {
        let texts = [
            ("TITLE", &self.title),
            ("ARTIST", &self.artist),
            ("ALBUM", &self.album),
            ("COMMENT", &self.comment),
            ("GENRE", &self.genre),
        ];
        for (key, value) in texts {
            let values = if value.is_empty() { Vec::new() } else { vec![TagValue::from(value.as_str())] };
            data.set_values(key, values);
        }
        for (key, value) in [("DATE", self.year), ("TRACKNUMBER", self.track)] {
            let values = if value == 0 { Vec::new() } else { vec![TagValue::Integer(value as i64)] };
            data.set_values(key, values);
        }
    }
}

/// `"2024-05-01"` → 2024, `"3/12"` → 3.
fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn to_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
}
