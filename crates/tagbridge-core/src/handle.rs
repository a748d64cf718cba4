//! File handle state machine.
//!
//! ```text
//! Empty --load_from_buffer--> Loaded --destroy--> Destroyed
//!   |                                                ^
//!   +--------------------destroy---------------------+
//! ```
//!
//! Reads go through a decoded cache. Mutations are staged on top of it and
//! only reach the engine on `save`, which replaces the buffer and drops both.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapter::keys;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{AudioProperties, FormatLabel, Picture, Rating, Tag, TagData};

/// Smallest buffer accepted by `load_from_buffer`. Every supported container
/// needs at least this much to carry its signature.
pub const MIN_BUFFER_LEN: usize = 12;

/// Backend-specific half of a handle.
pub trait HandleDriver: Send {
    /// Native load, for backends that keep per-file engine state.
    fn attach(&mut self, buffer: &Arc<[u8]>) -> AdapterResult<bool>;

    fn read_tags(&mut self, buffer: &[u8]) -> AdapterResult<TagData>;

    /// Apply `tags` and return the rewritten file.
    fn write_tags(&mut self, buffer: &[u8], tags: &TagData) -> AdapterResult<Vec<u8>>;

    fn format(&mut self, buffer: &[u8]) -> AdapterResult<FormatLabel>;

    fn is_mp4(&mut self, buffer: &[u8]) -> AdapterResult<bool> {
        Ok(self.format(buffer)? == FormatLabel::MP4)
    }

    fn mp4_item(&mut self, _key: &str) -> AdapterResult<Option<String>> {
        Err(AdapterError::Unsupported("MP4 item access"))
    }

    fn set_mp4_item(&mut self, _key: &str, _value: &str) -> AdapterResult<()> {
        Err(AdapterError::Unsupported("MP4 item access"))
    }

    fn remove_mp4_item(&mut self, _key: &str) -> AdapterResult<()> {
        Err(AdapterError::Unsupported("MP4 item access"))
    }

    /// Release native per-file state.
    fn release(&mut self) -> AdapterResult<()> {
        Ok(())
    }
}

enum HandleState {
    Empty,
    Loaded { buffer: Arc<[u8]> },
    Destroyed,
}

pub struct FileHandle {
    state: HandleState,
    driver: Box<dyn HandleDriver>,
    cache: Option<TagData>,
    pending: Option<TagData>,
}

impl FileHandle {
    pub fn new(driver: Box<dyn HandleDriver>) -> Self {
        Self { state: HandleState::Empty, driver, cache: None, pending: None }
    }

    /// Returns `false` and leaves the handle unchanged for buffers shorter
    /// than [`MIN_BUFFER_LEN`] or ones the engine refuses natively.
    pub fn load_from_buffer(&mut self, bytes: impl Into<Arc<[u8]>>) -> AdapterResult<bool> {
        self.ensure_alive()?;
        let buffer: Arc<[u8]> = bytes.into();
        if buffer.len() < MIN_BUFFER_LEN {
            return Ok(false);
        }
        if !self.driver.attach(&buffer)? {
            return Ok(false);
        }
        self.state = HandleState::Loaded { buffer };
        self.cache = None;
        self.pending = None;
        Ok(true)
    }

    /// Whether the engine can read the loaded buffer.
    pub fn is_valid(&mut self) -> AdapterResult<bool> {
        if self.loaded()?.is_none() {
            return Ok(false);
        }
        match self.current() {
            Ok(_) => Ok(true),
            Err(AdapterError::Engine { .. }) | Err(AdapterError::Codec(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn format(&mut self) -> AdapterResult<FormatLabel> {
        match self.loaded()? {
            None => Ok(FormatLabel::Unknown),
            Some(buffer) => self.driver.format(&buffer),
        }
    }

    /// The current file bytes. Empty before a successful load.
    pub fn buffer(&self) -> AdapterResult<Arc<[u8]>> {
        Ok(self.loaded()?.unwrap_or_else(|| Arc::from(Vec::new())))
    }

    /// The full document, staged edits included.
    pub fn tag_data(&mut self) -> AdapterResult<TagData> {
        Ok(self.current()?.cloned().unwrap_or_default())
    }

    pub fn properties(&mut self) -> AdapterResult<BTreeMap<String, Vec<String>>> {
        Ok(self.current()?.map(TagData::text_properties).unwrap_or_default())
    }

    /// Replace the whole property map.
    pub fn set_properties(&mut self, properties: BTreeMap<String, Vec<String>>) -> AdapterResult<()> {
        self.ensure_alive()?;
        let mut canonical = BTreeMap::new();
        for (key, values) in properties {
            let key = keys::settable(&key)?;
            let values: Vec<_> = values.iter().map(|v| keys::value_for(&key, v)).collect();
            if !values.is_empty() {
                canonical.insert(key, values);
            }
        }
        self.edit(|data| data.properties = canonical)
    }

    /// First value of `key`.
    pub fn property(&mut self, key: &str) -> AdapterResult<Option<String>> {
        let key = keys::canonicalize(key);
        Ok(self.current()?.and_then(|data| data.first_text(&key)))
    }

    /// Set a single value. An empty value removes the key.
    pub fn set_property(&mut self, key: &str, value: &str) -> AdapterResult<()> {
        self.ensure_alive()?;
        let key = keys::settable(key)?;
        let values = if value.is_empty() { Vec::new() } else { vec![keys::value_for(&key, value)] };
        self.edit(|data| data.set_values(&key, values))
    }

    pub fn tag(&mut self) -> AdapterResult<Tag> {
        Ok(self.current()?.map(Tag::from_data).unwrap_or_default())
    }

    pub fn set_tag(&mut self, tag: &Tag) -> AdapterResult<()> {
        self.edit(|data| tag.apply_to(data))
    }

    pub fn pictures(&mut self) -> AdapterResult<Vec<Picture>> {
        Ok(self.current()?.map(|d| d.pictures.clone()).unwrap_or_default())
    }

    pub fn set_pictures(&mut self, pictures: Vec<Picture>) -> AdapterResult<()> {
        self.edit(|data| data.pictures = pictures)
    }

    pub fn add_picture(&mut self, picture: Picture) -> AdapterResult<()> {
        self.edit(|data| data.pictures.push(picture))
    }

    pub fn remove_pictures(&mut self) -> AdapterResult<()> {
        self.edit(|data| data.pictures.clear())
    }

    pub fn ratings(&mut self) -> AdapterResult<Vec<Rating>> {
        Ok(self.current()?.map(|d| d.ratings.clone()).unwrap_or_default())
    }

    pub fn set_ratings(&mut self, ratings: Vec<Rating>) -> AdapterResult<()> {
        let ratings = ratings
            .into_iter()
            .map(|r| Rating { value: clamp_rating(r.value), ..r })
            .collect();
        self.edit(|data| data.ratings = ratings)
    }

    /// First rating's normalized value.
    pub fn rating(&mut self) -> AdapterResult<Option<f64>> {
        Ok(self.current()?.and_then(|d| d.ratings.first().map(|r| r.value)))
    }

    /// Replace all ratings with one anonymous rating.
    pub fn set_rating(&mut self, value: f64) -> AdapterResult<()> {
        let rating = Rating { value: clamp_rating(value), email: None, counter: 0 };
        self.edit(|data| data.ratings = vec![rating])
    }

    pub fn audio_properties(&mut self) -> AdapterResult<Option<AudioProperties>> {
        Ok(self.current()?.and_then(|d| d.audio.clone()))
    }

    /// Write staged edits through the engine. `false` when nothing is loaded.
    pub fn save(&mut self) -> AdapterResult<bool> {
        let Some(buffer) = self.loaded()? else {
            return Ok(false);
        };
        let Some(pending) = self.pending.as_ref() else {
            return Ok(true);
        };
        let rewritten = self.driver.write_tags(&buffer, pending)?;
        let buffer: Arc<[u8]> = Arc::from(rewritten);
        if !self.driver.attach(&buffer)? {
            return Err(AdapterError::Engine {
                op: "save",
                message: "engine rejected its own output".into(),
            });
        }
        self.state = HandleState::Loaded { buffer };
        self.cache = None;
        self.pending = None;
        Ok(true)
    }

    pub fn is_mp4(&mut self) -> AdapterResult<bool> {
        match self.loaded()? {
            None => Ok(false),
            Some(buffer) => self.driver.is_mp4(&buffer),
        }
    }

    pub fn mp4_item(&mut self, key: &str) -> AdapterResult<Option<String>> {
        self.ensure_alive()?;
        self.driver.mp4_item(key)
    }

    pub fn set_mp4_item(&mut self, key: &str, value: &str) -> AdapterResult<()> {
        self.ensure_alive()?;
        self.driver.set_mp4_item(key, value)
    }

    pub fn remove_mp4_item(&mut self, key: &str) -> AdapterResult<()> {
        self.ensure_alive()?;
        self.driver.remove_mp4_item(key)
    }

    /// Release the buffer and native state. Every later call fails with
    /// `HandleDestroyed`.
    pub fn destroy(&mut self) -> AdapterResult<()> {
        self.ensure_alive()?;
        self.state = HandleState::Destroyed;
        self.cache = None;
        self.pending = None;
        self.driver.release()
    }

    fn ensure_alive(&self) -> AdapterResult<()> {
        match self.state {
            HandleState::Destroyed => Err(AdapterError::HandleDestroyed),
            _ => Ok(()),
        }
    }

    fn loaded(&self) -> AdapterResult<Option<Arc<[u8]>>> {
        match &self.state {
            HandleState::Destroyed => Err(AdapterError::HandleDestroyed),
            HandleState::Empty => Ok(None),
            HandleState::Loaded { buffer } => Ok(Some(buffer.clone())),
        }
    }

    /// Staged document if any, else the (lazily filled) cache. `None` on Empty.
    fn current(&mut self) -> AdapterResult<Option<&TagData>> {
        let Some(buffer) = self.loaded()? else {
            return Ok(None);
        };
        if self.pending.is_none() && self.cache.is_none() {
            self.cache = Some(self.driver.read_tags(&buffer)?);
        }
        Ok(self.pending.as_ref().or(self.cache.as_ref()))
    }

    /// Apply `f` to the staged document. A no-op on Empty.
    fn edit(&mut self, f: impl FnOnce(&mut TagData)) -> AdapterResult<()> {
        let Some(base) = self.current()?.cloned() else {
            return Ok(());
        };
        f(self.pending.get_or_insert(base));
        Ok(())
    }
}

fn clamp_rating(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::FakeEngine;
    use crate::adapter::SystemInterfaceAdapter;
    use crate::backends::EngineBackend;
    use crate::models::TagValue;

    fn handle() -> FileHandle {
        let adapter = SystemInterfaceAdapter::new(std::sync::Arc::new(FakeEngine::new()), "fake");
        FileHandle::new(adapter.open_handle().unwrap())
    }

    fn sample_tags() -> TagData {
        let mut data = TagData::default();
        data.set_values("TITLE", vec!["Original".into()]);
        data.set_values("ARTIST", vec!["Someone".into()]);
        data.audio = Some(AudioProperties { length: 3, bitrate: 128, ..AudioProperties::default() });
        data
    }

    fn loaded() -> FileHandle {
        let mut h = handle();
        assert!(h.load_from_buffer(FakeEngine::container(&sample_tags())).unwrap());
        h
    }

    #[test]
    fn fresh_handle_defaults() {
        let mut h = handle();
        assert!(!h.is_valid().unwrap());
        assert!(h.buffer().unwrap().is_empty());
        assert_eq!(h.format().unwrap(), FormatLabel::Unknown);
        assert!(h.properties().unwrap().is_empty());
        assert!(h.pictures().unwrap().is_empty());
        assert!(h.audio_properties().unwrap().is_none());
        assert!(!h.save().unwrap());
        assert!(!h.is_mp4().unwrap());
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut h = handle();
        assert!(!h.load_from_buffer(Vec::new()).unwrap());
        assert!(!h.load_from_buffer(vec![0xFF; MIN_BUFFER_LEN - 1]).unwrap());
        assert!(h.buffer().unwrap().is_empty());
        assert!(!h.is_valid().unwrap());
    }

    #[test]
    fn load_does_not_validate() {
        let mut h = handle();
        assert!(h.load_from_buffer(b"not an audio file at all".to_vec()).unwrap());
        assert!(!h.is_valid().unwrap());
        assert!(matches!(h.properties(), Err(AdapterError::Engine { .. })));
    }

    #[test]
    fn reads_from_engine() {
        let mut h = loaded();
        assert!(h.is_valid().unwrap());
        assert_eq!(h.format().unwrap(), FormatLabel::MP3);
        assert_eq!(h.property("title").unwrap().as_deref(), Some("Original"));
        assert_eq!(h.tag().unwrap().artist, "Someone");
        assert_eq!(h.audio_properties().unwrap().map(|a| a.bitrate), Some(128));
    }

    #[test]
    fn property_round_trip() {
        let mut h = loaded();
        for value in ["plain", "with spaces", "sym!@#$%^&*()", "0042", "1999"] {
            h.set_property("DATE", value).unwrap();
            assert_eq!(h.property("DATE").unwrap().as_deref(), Some(value));
        }
        h.set_property("albumArtist", "VA").unwrap();
        assert_eq!(h.property("ALBUMARTIST").unwrap().as_deref(), Some("VA"));
    }

    #[test]
    fn set_properties_uses_uppercase_keys() {
        let mut h = loaded();
        let mut props = BTreeMap::new();
        props.insert("albumArtist".to_string(), vec!["Various".to_string()]);
        props.insert("MY_FIELD".to_string(), vec!["x".to_string()]);
        h.set_properties(props).unwrap();

        let got = h.properties().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["ALBUMARTIST"], vec!["Various".to_string()]);
        assert_eq!(got["MY_FIELD"], vec!["x".to_string()]);
        assert!(got.keys().all(|k| k == &k.to_ascii_uppercase()));
    }

    #[test]
    fn audio_keys_cannot_be_set() {
        let mut h = loaded();
        assert!(matches!(h.set_property("bitrate", "1"), Err(AdapterError::ReservedKey(_))));
        let mut props = BTreeMap::new();
        props.insert("SAMPLE_RATE".to_string(), vec!["48000".to_string()]);
        assert!(matches!(h.set_properties(props), Err(AdapterError::ReservedKey(_))));
    }

    #[test]
    fn save_writes_through_engine() {
        let mut h = loaded();
        let before = h.buffer().unwrap();
        h.set_property("TITLE", "Renamed").unwrap();
        h.set_rating(1.5).unwrap();
        assert!(h.save().unwrap());
        assert_ne!(h.buffer().unwrap(), before);

        // Fresh read from the new buffer.
        assert_eq!(h.property("TITLE").unwrap().as_deref(), Some("Renamed"));
        assert_eq!(h.rating().unwrap(), Some(1.0));

        let mut other = handle();
        assert!(other.load_from_buffer(h.buffer().unwrap()).unwrap());
        assert_eq!(other.tag_data().unwrap().properties["TITLE"], vec![TagValue::from("Renamed")]);
    }

    #[test]
    fn failed_save_keeps_staged_edits() {
        let adapter = SystemInterfaceAdapter::new(
            std::sync::Arc::new(FakeEngine::new().with_null_output()),
            "fake",
        );
        let mut h = FileHandle::new(adapter.open_handle().unwrap());
        assert!(h.load_from_buffer(FakeEngine::container(&sample_tags())).unwrap());
        let before = h.buffer().unwrap();

        h.set_property("TITLE", "Renamed").unwrap();
        assert!(matches!(h.save(), Err(AdapterError::Unsupported("buffer writing"))));
        assert_eq!(h.buffer().unwrap(), before);
        assert_eq!(h.property("TITLE").unwrap().as_deref(), Some("Renamed"));
    }

    #[test]
    fn pictures_are_staged() {
        let mut h = loaded();
        let pic = Picture {
            mime_type: "image/png".into(),
            data: vec![1, 2, 3],
            picture_type: 3,
            description: String::new(),
        };
        h.add_picture(pic.clone()).unwrap();
        assert_eq!(h.pictures().unwrap(), vec![pic]);
        h.remove_pictures().unwrap();
        assert!(h.pictures().unwrap().is_empty());
    }

    #[test]
    fn mp4_items_fail_loudly_on_system_interface() {
        let mut h = loaded();
        assert!(!h.is_mp4().unwrap());
        assert!(matches!(h.mp4_item("cpil"), Err(AdapterError::Unsupported(_))));
        assert!(matches!(h.set_mp4_item("cpil", "1"), Err(AdapterError::Unsupported(_))));
        assert!(matches!(h.remove_mp4_item("cpil"), Err(AdapterError::Unsupported(_))));
    }

    #[test]
    fn every_operation_fails_after_destroy() {
        for start_loaded in [false, true] {
            let mut h = if start_loaded { loaded() } else { handle() };
            h.destroy().unwrap();

            let destroyed = |r: AdapterResult<()>| matches!(r, Err(AdapterError::HandleDestroyed));
            assert!(destroyed(h.load_from_buffer(vec![0u8; 64]).map(|_| ())));
            assert!(destroyed(h.is_valid().map(|_| ())));
            assert!(destroyed(h.format().map(|_| ())));
            assert!(destroyed(h.buffer().map(|_| ())));
            assert!(destroyed(h.tag_data().map(|_| ())));
            assert!(destroyed(h.properties().map(|_| ())));
            assert!(destroyed(h.set_properties(BTreeMap::new())));
            assert!(destroyed(h.property("TITLE").map(|_| ())));
            assert!(destroyed(h.set_property("TITLE", "x")));
            assert!(destroyed(h.set_property("bitrate", "320")));
            let reserved = BTreeMap::from([("BITRATE".to_string(), vec!["1".to_string()])]);
            assert!(destroyed(h.set_properties(reserved)));
            assert!(destroyed(h.tag().map(|_| ())));
            assert!(destroyed(h.set_tag(&Tag::default())));
            assert!(destroyed(h.pictures().map(|_| ())));
            assert!(destroyed(h.set_pictures(Vec::new())));
            assert!(destroyed(h.add_picture(Picture {
                mime_type: String::new(),
                data: Vec::new(),
                picture_type: 0,
                description: String::new(),
            })));
            assert!(destroyed(h.remove_pictures()));
            assert!(destroyed(h.ratings().map(|_| ())));
            assert!(destroyed(h.set_ratings(Vec::new())));
            assert!(destroyed(h.rating().map(|_| ())));
            assert!(destroyed(h.set_rating(0.5)));
            assert!(destroyed(h.audio_properties().map(|_| ())));
            assert!(destroyed(h.save().map(|_| ())));
            assert!(destroyed(h.is_mp4().map(|_| ())));
            assert!(destroyed(h.mp4_item("x").map(|_| ())));
            assert!(destroyed(h.set_mp4_item("x", "y")));
            assert!(destroyed(h.remove_mp4_item("x")));
            assert!(destroyed(h.destroy()));
        }
    }
}
