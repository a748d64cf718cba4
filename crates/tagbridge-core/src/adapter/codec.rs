//! Tag protocol codec.
//!
//! One MessagePack map per engine call. Decoding sorts wire entries into
//! properties, pictures, ratings, audio properties and passthrough; encoding
//! writes them back in a fixed order:
//!
//! ```text
//! properties (canonical key order) | audio | pictures | ratings | passthrough
//! ```
//!
//! `encode(&decode(&encode(x)?)?)? == encode(x)?` holds whenever the
//! property keys of `x` came through [`TagData::set_values`] or [`decode`].

use rmpv::Value;

use crate::adapter::keys;
use crate::error::CodecError;
use crate::models::{AudioProperties, Picture, Rating, TagData, TagValue};

pub fn decode(bytes: &[u8]) -> Result<TagData, CodecError> {
    let mut cursor = bytes;
    let document =
        rmpv::decode::read_value(&mut cursor).map_err(|e| CodecError::Decode(e.to_string()))?;
    if !cursor.is_empty() {
        return Err(CodecError::TrailingBytes(cursor.len()));
    }
    let entries = match document {
        Value::Map(entries) => entries,
        _ => return Err(CodecError::NotAMap),
    };

    let mut data = TagData::default();
    let mut audio: Option<AudioProperties> = None;

    for (key, value) in entries {
        let key = match key {
            Value::String(s) if s.is_str() => s.into_str().unwrap_or_default(),
            other => {
                return Err(CodecError::UnexpectedType {
                    key: other.to_string(),
                    expected: "string key",
                })
            }
        };

        match key.as_str() {
            "pictures" => data.pictures = decode_pictures(&value)?,
            "ratings" => data.ratings = decode_ratings(&value)?,
            "hasArtwork" | "pictureCount" => {}
            k if keys::AUDIO_KEYS.contains(&k) => {
                decode_audio_field(audio.get_or_insert_with(AudioProperties::default), k, &value)?
            }
            // `BITRATE`, `SAMPLE_RATE` and friends are not tags.
            k if keys::is_reserved(k) => data.passthrough.push((key, value)),
            k => {
                if let Some(canonical) = keys::from_wire(k) {
                    let values = decode_values(&value).ok_or_else(|| CodecError::UnexpectedType {
                        key: key.clone(),
                        expected: "string, number or array of them",
                    })?;
                    insert_values(&mut data, canonical, values);
                } else if keys::is_verbatim_property(k) {
                    match decode_values(&value) {
                        Some(values) => insert_values(&mut data, &keys::canonicalize(k), values),
                        None => data.passthrough.push((key, value)),
                    }
                } else {
                    data.passthrough.push((key, value));
                }
            }
        }
    }

    data.audio = audio;
    Ok(data)
}

pub fn encode(data: &TagData) -> Result<Vec<u8>, CodecError> {
    let mut entries: Vec<(Value, Value)> = Vec::new();

    for (canonical, values) in &data.properties {
        let present: Vec<&TagValue> = values.iter().filter(|v| !v.is_absent()).collect();
        if present.is_empty() || keys::is_reserved(canonical) {
            continue;
        }
        let wire = keys::to_wire(canonical).unwrap_or(canonical.as_str());
        let value = match present.as_slice() {
            [single] => encode_value(single),
            many => Value::Array(many.iter().map(|v| encode_value(v)).collect()),
        };
        entries.push((Value::from(wire), value));
    }

    if let Some(audio) = &data.audio {
        entries.extend(encode_audio(audio));
    }

    if !data.pictures.is_empty() {
        let pictures = data.pictures.iter().map(encode_picture).collect();
        entries.push((Value::from("pictures"), Value::Array(pictures)));
    }

    if !data.ratings.is_empty() {
        let ratings = data.ratings.iter().map(encode_rating).collect();
        entries.push((Value::from("ratings"), Value::Array(ratings)));
    }

    entries.extend(data.passthrough.iter().cloned().map(|(k, v)| (Value::from(k), v)));

    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, &Value::Map(entries))
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(out)
}

fn insert_values(data: &mut TagData, key: &str, values: Vec<TagValue>) {
    let values: Vec<TagValue> = values.into_iter().filter(|v| !v.is_absent()).collect();
    if !values.is_empty() {
        data.properties.insert(key.to_string(), values);
    }
}

/// Scalar or array of scalars. `None` for anything else.
fn decode_values(value: &Value) -> Option<Vec<TagValue>> {
    match value {
        Value::Array(items) => items.iter().map(decode_scalar).collect(),
        other => decode_scalar(other).map(|v| vec![v]),
    }
}

fn decode_scalar(value: &Value) -> Option<TagValue> {
    match value {
        Value::String(s) => s.as_str().map(TagValue::from),
        Value::Integer(n) => n.as_i64().map(TagValue::Integer),
        Value::F64(f) => Some(TagValue::Float(*f)),
        Value::F32(f) => Some(TagValue::Float(*f as f64)),
        _ => None,
    }
}

fn encode_value(value: &TagValue) -> Value {
    match value {
        TagValue::Text(s) => Value::from(s.as_str()),
        TagValue::Integer(n) => Value::from(*n),
        TagValue::Float(f) => Value::F64(*f),
    }
}

fn decode_audio_field(audio: &mut AudioProperties, key: &str, value: &Value) -> Result<(), CodecError> {
    match key {
        "codec" => audio.codec = expect_str(key, value)?,
        "containerFormat" => audio.container_format = expect_str(key, value)?,
        "isLossless" => audio.is_lossless = expect_bool(key, value)?,
        "sampleFrames" => audio.sample_frames = Some(expect_u64(key, value)?),
        _ => {
            let n = expect_u32(key, value)?;
            match key {
                "length" => audio.length = n,
                "lengthMs" => audio.length_ms = n,
                "bitrate" => audio.bitrate = n,
                "sampleRate" => audio.sample_rate = n,
                "channels" => audio.channels = n,
                "bitsPerSample" => audio.bits_per_sample = n,
                _ => {}
            }
        }
    }
    Ok(())
}

fn encode_audio(audio: &AudioProperties) -> Vec<(Value, Value)> {
    let mut fields = vec![
        (Value::from("length"), Value::from(audio.length)),
        (Value::from("lengthMs"), Value::from(audio.length_ms)),
        (Value::from("bitrate"), Value::from(audio.bitrate)),
        (Value::from("sampleRate"), Value::from(audio.sample_rate)),
        (Value::from("channels"), Value::from(audio.channels)),
        (Value::from("bitsPerSample"), Value::from(audio.bits_per_sample)),
    ];
    if let Some(frames) = audio.sample_frames {
        fields.push((Value::from("sampleFrames"), Value::from(frames)));
    }
    fields.extend([
        (Value::from("codec"), Value::from(audio.codec.as_str())),
        (Value::from("containerFormat"), Value::from(audio.container_format.as_str())),
        (Value::from("isLossless"), Value::Boolean(audio.is_lossless)),
    ]);
    fields
}

fn decode_pictures(value: &Value) -> Result<Vec<Picture>, CodecError> {
    let items = expect_array("pictures", value)?;
    items
        .iter()
        .map(|item| {
            let mut picture = Picture {
                mime_type: String::new(),
                data: Vec::new(),
                picture_type: 0,
                description: String::new(),
            };
            for (k, v) in expect_map("pictures", item)? {
                match k.as_str() {
                    Some("mimeType") => picture.mime_type = expect_str("mimeType", v)?,
                    Some("data") => match v {
                        Value::Binary(bytes) => picture.data = bytes.clone(),
                        _ => {
                            return Err(CodecError::UnexpectedType {
                                key: "data".into(),
                                expected: "binary",
                            })
                        }
                    },
                    Some("type") => picture.picture_type = expect_u32("type", v)?,
                    Some("description") => picture.description = expect_str("description", v)?,
                    _ => {}
                }
            }
            Ok(picture)
        })
        .collect()
}

fn encode_picture(picture: &Picture) -> Value {
    Value::Map(vec![
        (Value::from("mimeType"), Value::from(picture.mime_type.as_str())),
        (Value::from("data"), Value::Binary(picture.data.clone())),
        (Value::from("type"), Value::from(picture.picture_type)),
        (Value::from("description"), Value::from(picture.description.as_str())),
    ])
}

fn decode_ratings(value: &Value) -> Result<Vec<Rating>, CodecError> {
    let items = expect_array("ratings", value)?;
    items
        .iter()
        .map(|item| {
            let mut rating = Rating { value: 0.0, email: None, counter: 0 };
            for (k, v) in expect_map("ratings", item)? {
                match k.as_str() {
                    Some("rating") => {
                        rating.value = match v {
                            Value::F64(f) => *f,
                            Value::F32(f) => *f as f64,
                            Value::Integer(n) => n.as_f64().unwrap_or(0.0),
                            _ => {
                                return Err(CodecError::UnexpectedType {
                                    key: "rating".into(),
                                    expected: "number",
                                })
                            }
                        }
                    }
                    Some("email") => {
                        rating.email = Some(expect_str("email", v)?).filter(|e| !e.is_empty())
                    }
                    Some("counter") => rating.counter = expect_u32("counter", v)?,
                    _ => {}
                }
            }
            Ok(rating)
        })
        .collect()
}

fn encode_rating(rating: &Rating) -> Value {
    let mut fields = vec![(Value::from("rating"), Value::F64(rating.value))];
    if let Some(email) = rating.email.as_deref().filter(|e| !e.is_empty()) {
        fields.push((Value::from("email"), Value::from(email)));
    }
    fields.push((Value::from("counter"), Value::from(rating.counter)));
    Value::Map(fields)
}

fn expect_array<'a>(key: &str, value: &'a Value) -> Result<&'a [Value], CodecError> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(CodecError::UnexpectedType { key: key.into(), expected: "array" }),
    }
}

fn expect_map<'a>(key: &str, value: &'a Value) -> Result<&'a [(Value, Value)], CodecError> {
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err(CodecError::UnexpectedType { key: key.into(), expected: "map" }),
    }
}

fn expect_str(key: &str, value: &Value) -> Result<String, CodecError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CodecError::UnexpectedType { key: key.into(), expected: "string" })
}

fn expect_bool(key: &str, value: &Value) -> Result<bool, CodecError> {
    value
        .as_bool()
        .ok_or_else(|| CodecError::UnexpectedType { key: key.into(), expected: "boolean" })
}

fn expect_u64(key: &str, value: &Value) -> Result<u64, CodecError> {
    value
        .as_u64()
        .ok_or_else(|| CodecError::UnexpectedType { key: key.into(), expected: "unsigned integer" })
}

fn expect_u32(key: &str, value: &Value) -> Result<u32, CodecError> {
    expect_u64(key, value).and_then(|n| {
        u32::try_from(n).map_err(|_| CodecError::UnexpectedType { key: key.into(), expected: "u32" })
    })
}
