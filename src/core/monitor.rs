//! Poll-based attach/detach detection for the drives named by export rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::drives::DriveFs;
use crate::settings::ExportItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveEvent {
    Attached(String),
    Detached(String),
}

/// Last known state of one configured drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveState {
    pub drive_name: String,
    pub attached: bool,
}

/// Remembers which configured drives were attached at the previous poll.
///
/// The map only ever holds drives named by the current rules; it is rebuilt
/// on every poll. A drive that is already present on the first poll is
/// reported as attached.
#[derive(Debug, Default)]
pub struct DriveMonitor {
    states: BTreeMap<String, bool>,
}

impl DriveMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every drive named in `rules` and return the transitions since the last poll.
    pub fn poll(&mut self, fs: &dyn DriveFs, rules: &[ExportItem]) -> Vec<DriveEvent> {
        let mut next = BTreeMap::new();
        let mut events = Vec::new();

        for rule in rules {
            let name = rule.drive_name.trim();
            if name.is_empty() || next.contains_key(name) {
                continue;
            }

            let attached = fs.drive_exists(name);
            let was_attached = self.states.get(name).copied().unwrap_or(false);

            match (was_attached, attached) {
                (false, true) => events.push(DriveEvent::Attached(name.to_string())),
                (true, false) => events.push(DriveEvent::Detached(name.to_string())),
                _ => {}
            }

            next.insert(name.to_string(), attached);
        }

        self.states = next;
        events
    }

    pub fn states(&self) -> Vec<DriveState> {
        self.states
            .iter()
            .map(|(name, attached)| DriveState {
                drive_name: name.clone(),
                attached: *attached,
            })
            .collect()
    }
}
