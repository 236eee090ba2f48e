//! Exercise catalog and training history.

use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Exercise {
    #[serde(deserialize_with = "super::de::string_or_number")]
    pub id: String,
    pub name: String,
    pub series: u32,
    pub repetitions: u32,
    pub group: String,
    pub demo: String,
    pub thumb: String,
}

impl Exercise {
    /// Format the prescription line shown on exercise cards
    pub fn summary(&self) -> String {
        format!("{} series x {} repetitions", self.series, self.repetitions)
    }
}

/// One completed exercise in the user's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct HistoryEntry {
    #[serde(deserialize_with = "super::de::string_or_number")]
    pub id: String,
    pub name: String,
    pub group: String,
    pub hour: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// History entries grouped under a day heading, newest day first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct HistoryDay {
    pub title: String,
    pub data: Vec<HistoryEntry>,
}
