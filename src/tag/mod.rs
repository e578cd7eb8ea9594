//! Tag records.
//!
//! A [`Tag`] is the plain state of one measurement point. A
//! [`TagController`] is the cache entry wrapping it: internally synchronized,
//! owning the entry's listener set, and the only thing that mutates a tag.

mod controller;
mod quality;
mod record;

pub use controller::TagController;
pub use quality::{TagQuality, TagQualityStatus};
pub use record::{Tag, UNINITIALISED_DESCRIPTION, UNKNOWN_NAME};
