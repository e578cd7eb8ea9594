//! Tag quality: a set of independent invalidity flags with reasons.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const VALID_DESCRIPTION: &str = "OK";

/// A named reason why a tag value should not be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagQualityStatus {
    /// The server does not know the tag.
    UndefinedTag,
    /// No value has been received yet.
    Uninitialised,
    Inaccessible,
    ProcessDown,
    EquipmentDown,
    SubEquipmentDown,
    /// The connection to the broker is lost.
    BrokerDown,
    /// The server heartbeat is no longer received.
    HeartbeatExpired,
    ValueOutOfBounds,
    ValueExpired,
    UnknownReason,
}

impl TagQualityStatus {
    /// Lower is more severe.
    pub fn severity(self) -> u8 {
        match self {
            TagQualityStatus::UndefinedTag => 0,
            TagQualityStatus::Uninitialised => 1,
            TagQualityStatus::BrokerDown => 2,
            TagQualityStatus::HeartbeatExpired => 2,
            TagQualityStatus::ProcessDown => 3,
            TagQualityStatus::EquipmentDown => 3,
            TagQualityStatus::SubEquipmentDown => 3,
            TagQualityStatus::Inaccessible => 3,
            TagQualityStatus::ValueExpired => 4,
            TagQualityStatus::ValueOutOfBounds => 4,
            TagQualityStatus::UnknownReason => 5,
        }
    }

    /// Flags meaning the value cannot currently reach us.
    fn blocks_access(self) -> bool {
        matches!(
            self,
            TagQualityStatus::Inaccessible
                | TagQualityStatus::ProcessDown
                | TagQualityStatus::EquipmentDown
                | TagQualityStatus::SubEquipmentDown
                | TagQualityStatus::BrokerDown
                | TagQualityStatus::HeartbeatExpired
        )
    }

    /// Flags owned by the per-producer supervision, kept across server updates.
    pub(crate) fn is_supervision(self) -> bool {
        matches!(
            self,
            TagQualityStatus::ProcessDown
                | TagQualityStatus::EquipmentDown
                | TagQualityStatus::SubEquipmentDown
        )
    }
}

impl fmt::Display for TagQualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TagQualityStatus::UndefinedTag => "UNDEFINED_TAG",
            TagQualityStatus::Uninitialised => "UNINITIALISED",
            TagQualityStatus::Inaccessible => "INACCESSIBLE",
            TagQualityStatus::ProcessDown => "PROCESS_DOWN",
            TagQualityStatus::EquipmentDown => "EQUIPMENT_DOWN",
            TagQualityStatus::SubEquipmentDown => "SUBEQUIPMENT_DOWN",
            TagQualityStatus::BrokerDown => "BROKER_DOWN",
            TagQualityStatus::HeartbeatExpired => "HEARTBEAT_EXPIRED",
            TagQualityStatus::ValueOutOfBounds => "VALUE_OUT_OF_BOUNDS",
            TagQualityStatus::ValueExpired => "VALUE_EXPIRED",
            TagQualityStatus::UnknownReason => "UNKNOWN_REASON",
        };
        f.write_str(name)
    }
}

/// Set of invalidity flags. A tag is valid iff the set is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagQuality {
    invalid_states: BTreeMap<TagQualityStatus, String>,
}

impl TagQuality {
    pub fn valid() -> Self {
        Self::default()
    }

    /// Quality with exactly one flag set.
    pub fn invalid(status: TagQualityStatus, reason: impl Into<String>) -> Self {
        let mut quality = Self::default();
        quality.add_invalid_status(status, reason);
        quality
    }

    pub fn is_valid(&self) -> bool {
        self.invalid_states.is_empty()
    }

    /// False once the server reported the tag as unknown.
    pub fn is_existing(&self) -> bool {
        !self.is_set(TagQualityStatus::UndefinedTag)
    }

    pub fn is_initialised(&self) -> bool {
        !self.is_set(TagQualityStatus::Uninitialised)
    }

    pub fn is_accessible(&self) -> bool {
        !self.invalid_states.keys().any(|s| s.blocks_access())
    }

    pub fn is_set(&self, status: TagQualityStatus) -> bool {
        self.invalid_states.contains_key(&status)
    }

    pub fn reason(&self, status: TagQualityStatus) -> Option<&str> {
        self.invalid_states.get(&status).map(String::as_str)
    }

    /// Add (or re-word) a flag. Returns true if the quality changed.
    pub fn add_invalid_status(&mut self, status: TagQualityStatus, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if self.invalid_states.get(&status) == Some(&reason) {
            return false;
        }
        self.invalid_states.insert(status, reason);
        true
    }

    /// Returns true if the flag was present.
    pub fn remove_invalid_status(&mut self, status: TagQualityStatus) -> bool {
        self.invalid_states.remove(&status).is_some()
    }

    /// Replace all flags with a single one.
    pub fn set_invalid_status(&mut self, status: TagQualityStatus, reason: impl Into<String>) {
        self.invalid_states.clear();
        self.invalid_states.insert(status, reason.into());
    }

    /// Replace all flags with the flags of `other`.
    pub fn set_invalid_states(&mut self, other: &TagQuality) {
        self.invalid_states = other.invalid_states.clone();
    }

    pub fn validate(&mut self) {
        self.invalid_states.clear();
    }

    pub fn invalid_states(&self) -> impl Iterator<Item = (TagQualityStatus, &str)> {
        self.invalid_states.iter().map(|(s, r)| (*s, r.as_str()))
    }

    /// Reasons of the most severe flags, or "OK".
    pub fn description(&self) -> String {
        let Some(top) = self.invalid_states.keys().map(|s| s.severity()).min() else {
            return VALID_DESCRIPTION.to_string();
        };

        self.invalid_states
            .iter()
            .filter(|(s, _)| s.severity() == top)
            .map(|(_, r)| r.trim())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for TagQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return f.write_str(VALID_DESCRIPTION);
        }
        let names: Vec<String> = self.invalid_states.keys().map(|s| s.to_string()).collect();
        f.write_str(&names.join("+"))
    }
}
