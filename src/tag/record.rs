//! Tag snapshot: the plain data held by a cache entry.

use super::quality::{TagQuality, TagQualityStatus};
use crate::rule::RuleExpression;
use crate::types::{SupervisionEvent, TagId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Description of a tag that has not received any server state yet.
pub const UNINITIALISED_DESCRIPTION: &str = "Tag not initialised.";

/// Name reported until the server provides one.
pub const UNKNOWN_NAME: &str = "UNKNOWN";

/// Latest known state of a tag.
///
/// This is what listeners receive: an owned copy, never a handle into the
/// cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub unit: String,
    pub description: String,
    pub value: Option<serde_json::Value>,
    pub value_description: String,
    pub server_timestamp: Timestamp,
    pub daq_timestamp: Option<Timestamp>,
    pub source_timestamp: Option<Timestamp>,
    pub quality: TagQuality,
    /// Last supervision event per process the tag depends on.
    pub process_status: BTreeMap<u64, Option<SupervisionEvent>>,
    pub equipment_status: BTreeMap<u64, Option<SupervisionEvent>>,
    pub sub_equipment_status: BTreeMap<u64, Option<SupervisionEvent>>,
    pub rule_expression: Option<RuleExpression>,
    pub control_tag: bool,
    pub alive_tag: bool,
    pub metadata: BTreeMap<String, String>,
}

impl Tag {
    /// A tag known only by id, flagged uninitialised.
    pub fn new(id: TagId) -> Self {
        Self {
            id,
            name: UNKNOWN_NAME.to_string(),
            unit: String::new(),
            description: UNINITIALISED_DESCRIPTION.to_string(),
            value: None,
            value_description: String::new(),
            server_timestamp: Timestamp::default(),
            daq_timestamp: None,
            source_timestamp: None,
            quality: TagQuality::invalid(TagQualityStatus::Uninitialised, UNINITIALISED_DESCRIPTION),
            process_status: BTreeMap::new(),
            equipment_status: BTreeMap::new(),
            sub_equipment_status: BTreeMap::new(),
            rule_expression: None,
            control_tag: false,
            alive_tag: false,
            metadata: BTreeMap::new(),
        }
    }

    /// A tag the server does not know.
    pub fn unknown(id: TagId, reason: impl Into<String>) -> Self {
        let mut tag = Self::new(id);
        tag.quality.set_invalid_status(TagQualityStatus::UndefinedTag, reason);
        tag
    }

    pub fn is_valid(&self) -> bool {
        self.quality.is_valid()
    }

    pub fn is_existing(&self) -> bool {
        self.quality.is_existing()
    }

    pub fn is_rule_tag(&self) -> bool {
        self.rule_expression.is_some()
    }

    pub fn process_ids(&self) -> Vec<u64> {
        self.process_status.keys().copied().collect()
    }

    pub fn equipment_ids(&self) -> Vec<u64> {
        self.equipment_status.keys().copied().collect()
    }

    pub fn sub_equipment_ids(&self) -> Vec<u64> {
        self.sub_equipment_status.keys().copied().collect()
    }

    /// Control tags other than alive tags are not invalidated by supervision.
    pub fn follows_supervision(&self) -> bool {
        !self.control_tag || self.alive_tag
    }
}
