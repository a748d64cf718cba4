//! tagbridge data models.
//!
//! Plain data that crosses the engine boundary: the tag document in its
//! canonical shape, and the coarse container classification.

pub mod media;
pub mod tags;

pub use media::FormatLabel;
pub use tags::{AudioProperties, Picture, Rating, Tag, TagData, TagValue};
