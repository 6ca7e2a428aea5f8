//! Dashboard card record types
//!
//! [`CardRecord`] is the common envelope (`kind`, `report_id`, `card_id`,
//! optional `data` and `meta`); the card kinds in [`cards`] supply typed data.

pub mod cards;
pub mod record;

pub use cards::*;
pub use record::{CardData, CardRecord, QueryMetadata};

/// A handler-produced value before validation.
pub type RawItem = serde_json::Value;

/// Convert any serializable object into a [`RawItem`].
pub fn raw_item<T: serde::Serialize>(value: &T) -> Result<RawItem, serde_json::Error> {
    serde_json::to_value(value)
}
