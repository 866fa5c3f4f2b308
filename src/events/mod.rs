//! Event classification
//!
//! Buckets the events of a finalized transaction into what was sent, executed,
//! failed and received, keyed by (pallet, event name).

use crate::chain::ChainEvent;

use serde::Serialize;

/// Semantic bucket of a ledger event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Sent,
    Executed,
    Failed,
    Received,
}

/// (section, method) -> bucket
const DISPATCH_TABLE: [(&str, &str, EventCategory); 7] = [
    ("messageQueue", "MessageSent", EventCategory::Sent),
    ("messageQueue", "Success", EventCategory::Executed),
    ("messageQueue", "Fail", EventCategory::Failed),
    ("tokens", "Transferred", EventCategory::Sent),
    ("balances", "Transfer", EventCategory::Received),
    ("system", "ExtrinsicSuccess", EventCategory::Executed),
    ("system", "ExtrinsicFailed", EventCategory::Failed),
];

/// Bucket for an event, `None` for pairs we don't track
pub fn category(section: &str, method: &str) -> Option<EventCategory> {
    DISPATCH_TABLE
        .iter()
        .find(|(s, m, _)| *s == section && *m == method)
        .map(|(_, _, c)| *c)
}

/// Events grouped by category, each list in emission order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassifiedEvents {
    pub sent: Vec<ChainEvent>,
    pub executed: Vec<ChainEvent>,
    pub failed: Vec<ChainEvent>,
    pub received: Vec<ChainEvent>,
}

impl ClassifiedEvents {
    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
            && self.executed.is_empty()
            && self.failed.is_empty()
            && self.received.is_empty()
    }

    pub fn total(&self) -> usize {
        self.sent.len() + self.executed.len() + self.failed.len() + self.received.len()
    }
}

pub fn classify(events: &[ChainEvent]) -> ClassifiedEvents {
    let mut classified = ClassifiedEvents::default();

    for event in events {
        let bucket = match category(&event.section, &event.method) {
            Some(EventCategory::Sent) => &mut classified.sent,
            Some(EventCategory::Executed) => &mut classified.executed,
            Some(EventCategory::Failed) => &mut classified.failed,
            Some(EventCategory::Received) => &mut classified.received,
            None => continue,
        };
        bucket.push(event.clone());
    }

    classified
}
