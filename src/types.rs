//! Core types shared by the cache, the synchronizer and the collaborators.

use crate::tag::TagQuality;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier of a tag.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagId(pub u64);

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagId({})", self.0)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TagId {
    fn from(id: u64) -> Self {
        TagId(id)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Which of the two caches currently answers read queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    Live,
    History,
}

impl CacheMode {
    pub fn is_history(self) -> bool {
        self == CacheMode::History
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::Live => f.write_str("live"),
            CacheMode::History => f.write_str("history"),
        }
    }
}

/// Value part of a server update, as delivered on the push channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagValueUpdate {
    pub tag_id: TagId,
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub value_description: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quality: TagQuality,
    /// Updates without a server timestamp are never applied.
    pub server_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub daq_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub source_timestamp: Option<Timestamp>,
}

impl TagValueUpdate {
    /// A valid-quality value update stamped by the server at `server_timestamp`.
    pub fn new(tag_id: TagId, value: serde_json::Value, server_timestamp: Timestamp) -> Self {
        Self {
            tag_id,
            value: Some(value),
            value_description: String::new(),
            description: String::new(),
            quality: TagQuality::valid(),
            server_timestamp: Some(server_timestamp),
            daq_timestamp: None,
            source_timestamp: None,
        }
    }

    pub fn with_quality(mut self, quality: TagQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_daq_timestamp(mut self, ts: Timestamp) -> Self {
        self.daq_timestamp = Some(ts);
        self
    }

    pub fn with_source_timestamp(mut self, ts: Timestamp) -> Self {
        self.source_timestamp = Some(ts);
        self
    }
}

/// Full tag state returned by the server: static configuration plus value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagUpdate {
    pub value: TagValueUpdate,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub process_ids: Vec<u64>,
    #[serde(default)]
    pub equipment_ids: Vec<u64>,
    #[serde(default)]
    pub sub_equipment_ids: Vec<u64>,
    /// Source of a derived (rule) tag.
    #[serde(default)]
    pub rule_expression: Option<String>,
    #[serde(default)]
    pub control_tag: bool,
    #[serde(default)]
    pub alive_tag: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TagUpdate {
    pub fn new(name: impl Into<String>, value: TagValueUpdate) -> Self {
        Self {
            value,
            name: name.into(),
            unit: String::new(),
            process_ids: Vec::new(),
            equipment_ids: Vec::new(),
            sub_equipment_ids: Vec::new(),
            rule_expression: None,
            control_tag: false,
            alive_tag: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TagId {
        self.value.tag_id
    }

    pub fn with_process_ids(mut self, ids: Vec<u64>) -> Self {
        self.process_ids = ids;
        self
    }

    pub fn with_equipment_ids(mut self, ids: Vec<u64>) -> Self {
        self.equipment_ids = ids;
        self
    }

    pub fn with_sub_equipment_ids(mut self, ids: Vec<u64>) -> Self {
        self.sub_equipment_ids = ids;
        self
    }

    pub fn with_rule_expression(mut self, expression: impl Into<String>) -> Self {
        self.rule_expression = Some(expression.into());
        self
    }

    pub fn with_control_flags(mut self, control_tag: bool, alive_tag: bool) -> Self {
        self.control_tag = control_tag;
        self.alive_tag = alive_tag;
        self
    }
}

/// Kind of upstream producer a supervision event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisionEntity {
    Process,
    Equipment,
    SubEquipment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisionStatus {
    Startup,
    Running,
    RunningLocal,
    Uncertain,
    Down,
    Stopped,
}

impl SupervisionStatus {
    /// Whether the status contributes its message to an invalidation reason.
    pub fn is_down(self) -> bool {
        matches!(self, SupervisionStatus::Down | SupervisionStatus::Stopped)
    }
}

/// Health change of a process, equipment or sub-equipment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionEvent {
    pub entity: SupervisionEntity,
    pub entity_id: u64,
    pub status: SupervisionStatus,
    pub message: String,
    pub timestamp: Timestamp,
}

impl SupervisionEvent {
    pub fn new(
        entity: SupervisionEntity,
        entity_id: u64,
        status: SupervisionStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity,
            entity_id,
            status,
            message: message.into(),
            timestamp: Timestamp::now(),
        }
    }
}
