//! User interaction events
//!
//! `UserEvent` is the unit of ingestion: one user touching one catalog item.
//! Events are immutable once built; the pipeline validates them before any
//! state is mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Kind of interaction a user had with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    View,
    Click,
    Cart,
    Purchase,
    Like,
    Review,
    Share,
    Wishlist,
}

impl EventType {
    /// All known event types
    pub const ALL: [EventType; 8] = [
        EventType::View,
        EventType::Click,
        EventType::Cart,
        EventType::Purchase,
        EventType::Like,
        EventType::Review,
        EventType::Share,
        EventType::Wishlist,
    ];

    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Click => "click",
            EventType::Cart => "cart",
            EventType::Purchase => "purchase",
            EventType::Like => "like",
            EventType::Review => "review",
            EventType::Share => "share",
            EventType::Wishlist => "wishlist",
        }
    }

    /// Whether this interaction bumps the item's trending score
    pub fn is_trending_signal(&self) -> bool {
        matches!(self, EventType::View | EventType::Click | EventType::Purchase)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidEvent(format!("unknown event type '{}'", s)))
    }
}

/// A single user interaction as it arrives at the ingestion boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    pub user_id: String,
    pub item_id: String,
    pub event_type: EventType,
    /// Defaults to the time of decoding when omitted
    #[serde(default = "crate::time::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub source: String,
    /// Opaque caller-supplied attributes
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

impl UserEvent {
    /// Build an event with empty session/device/source metadata
    pub fn new(
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        event_type: EventType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            event_type,
            timestamp,
            session_id: String::new(),
            device_type: String::new(),
            source: String::new(),
            context: HashMap::new(),
            experiment_id: None,
            variant: None,
        }
    }

    /// Attach experiment metadata
    pub fn with_experiment(mut self, experiment_id: impl Into<String>, variant: Option<String>) -> Self {
        self.experiment_id = Some(experiment_id.into());
        self.variant = variant;
        self
    }

    /// Check the fields ingestion depends on
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidEvent("user_id must not be empty".to_string()));
        }
        if self.item_id.trim().is_empty() {
            return Err(Error::InvalidEvent("item_id must not be empty".to_string()));
        }
        Ok(())
    }
}
