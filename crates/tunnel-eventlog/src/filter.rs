//! Event type filtering

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::event::EventType;

/// Set of accepted event types; the empty set accepts everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTypeFilter {
    types: HashSet<EventType>,
}

impl EventTypeFilter {
    pub fn new(types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            types: types.into_iter().collect(),
        }
    }

    /// Filter that accepts every event
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, event_type: EventType) -> bool {
        self.types.is_empty() || self.types.contains(&event_type)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<EventType> for EventTypeFilter {
    fn from_iter<I: IntoIterator<Item = EventType>>(iter: I) -> Self {
        Self::new(iter)
    }
}
