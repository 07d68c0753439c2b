//! State owned by the reconciliation service.
//!
//! Every method here runs while the service holds its state lock. Methods
//! that change what subscribers should see return the [`StreamMessage`] to
//! broadcast; the caller sends it only after releasing the lock.
use crate::container::{self, ContainerRecord, matching};
use crate::engine::LiveEvent;
use crate::fingerprint::fingerprint;
use crate::tunnel::{self, TunnelTable};

use super::vocabulary::{EventAction, EventVocabulary};

/// Advisory shown while the engine binary cannot be found.
pub const UNAVAILABLE_MESSAGE: &str = "Container engine is not available on the server.";
/// Advisory shown when a resync failed for any other reason.
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load containers.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMessageKind {
    Containers,
    Error,
}

/// Update pushed to subscribers: either a full snapshot or an error with an
/// empty container list.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: StreamMessageKind,
    pub data: Vec<ContainerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StreamMessage {
    pub fn containers(data: Vec<ContainerRecord>) -> Self {
        Self {
            kind: StreamMessageKind::Containers,
            data,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StreamMessageKind::Error,
            data: Vec::new(),
            message: Some(message.into()),
        }
    }
}

/// Externally visible health of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    /// No resync has completed yet.
    Uninitialized,
    Healthy,
    /// The last resync failed; carries the advisory message.
    Degraded(String),
}

/// Result of applying one live event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not a container event, verb not allowed, or nothing to correlate on.
    Ignored,
    /// No trusted baseline yet (uninitialized or degraded); a resync is due instead.
    Untrusted,
    /// Allowed event that did not alter the container set.
    Unchanged,
    /// The container set changed.
    Changed { removal: bool },
}

impl EventOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, EventOutcome::Changed { .. })
    }
}

#[derive(Debug, Default)]
pub struct ServiceState {
    containers: Vec<ContainerRecord>,
    hash: Option<u64>,
    /// Empty while healthy.
    err_message: String,
    initialized: bool,
    tunnels: TunnelTable,
}

impl ServiceState {
    pub fn containers(&self) -> &[ContainerRecord] {
        &self.containers
    }

    pub fn tunnels(&self) -> &TunnelTable {
        &self.tunnels
    }

    pub fn health(&self) -> Health {
        if !self.initialized {
            Health::Uninitialized
        } else if self.err_message.is_empty() {
            Health::Healthy
        } else {
            Health::Degraded(self.err_message.clone())
        }
    }

    /// Installs the result of a successful full resync.
    ///
    /// Broadcasts when the content changed or when recovering from an error.
    pub fn publish(
        &mut self,
        mut containers: Vec<ContainerRecord>,
        discovered: TunnelTable,
    ) -> Option<StreamMessage> {
        container::sort_containers(&mut containers);
        tunnel::merge(&mut self.tunnels, discovered);
        tunnel::prune(&mut self.tunnels, &containers);
        tunnel::enrich(&mut containers, &self.tunnels);

        let hash = fingerprint(&containers);
        let changed = self.hash != Some(hash) || !self.err_message.is_empty();
        self.containers = containers;
        self.hash = Some(hash);
        self.err_message.clear();
        self.initialized = true;

        changed.then(|| StreamMessage::containers(self.containers.clone()))
    }

    /// Moves into the degraded state. Broadcasts only when the message differs
    /// from the current one.
    pub fn fail(&mut self, message: &str) -> Option<StreamMessage> {
        let changed = self.err_message != message;
        self.err_message = message.to_owned();
        self.initialized = true;
        self.containers.clear();
        self.hash = None;

        changed.then(|| StreamMessage::error(message))
    }

    /// Applies a single live event to the container set.
    ///
    /// Returns the outcome plus the snapshot to broadcast, if any.
    pub fn apply_event(
        &mut self,
        event: &LiveEvent,
        vocabulary: &EventVocabulary,
    ) -> (EventOutcome, Option<StreamMessage>) {
        if !event.is_container_event() || !event.is_identifiable() {
            return (EventOutcome::Ignored, None);
        }
        let Some(action) = vocabulary.action(&event.status) else {
            return (EventOutcome::Ignored, None);
        };
        if !self.initialized || !self.err_message.is_empty() {
            return (EventOutcome::Untrusted, None);
        }

        let removal = *action == EventAction::Remove;
        let changed = if removal {
            self.remove(event)
        } else {
            self.upsert(event, vocabulary.display_status(&event.status))
        };
        if !changed {
            return (EventOutcome::Unchanged, None);
        }

        container::sort_containers(&mut self.containers);
        tunnel::enrich(&mut self.containers, &self.tunnels);
        let hash = fingerprint(&self.containers);
        let message = (self.hash != Some(hash))
            .then(|| StreamMessage::containers(self.containers.clone()));
        self.hash = Some(hash);

        (EventOutcome::Changed { removal }, message)
    }

    /// Deletes the matching record, scanning from the end, and evicts its
    /// tunnel state.
    fn remove(&mut self, event: &LiveEvent) -> bool {
        let Some(idx) = self.containers.iter().rposition(|c| matches_event(c, event)) else {
            return false;
        };

        let removed = self.containers.remove(idx);
        tunnel::evict(&mut self.tunnels, &removed.id);
        log::debug!("removed container `{}` ({})", removed.name, removed.id);

        true
    }

    /// Updates the matching record from the event, or appends a minimal one.
    fn upsert(&mut self, event: &LiveEvent, status: Option<String>) -> bool {
        let Some(idx) = self.containers.iter().position(|c| matches_event(c, event)) else {
            self.containers.push(ContainerRecord {
                id: event.id.clone(),
                name: matching::display_name(&event.name).to_owned(),
                image: event.image.clone(),
                status: status.unwrap_or_default(),
                ..Default::default()
            });
            return true;
        };

        let existing = &mut self.containers[idx];
        let mut changed = false;
        changed |= replace_if_different(&mut existing.name, matching::display_name(&event.name));
        changed |= replace_if_different(&mut existing.image, &event.image);
        changed |= replace_id(&mut existing.id, &event.id);
        if let Some(status) = status {
            changed |= replace_if_different(&mut existing.status, &status);
        }

        changed
    }
}

fn matches_event(container: &ContainerRecord, event: &LiveEvent) -> bool {
    matching::is_same_container(&container.id, &container.name, &event.id, &event.name)
}

/// Replaces the stored id unless the event only carries a truncation of it.
/// Events often report short ids while listings report full ones; writing the
/// short one back would flip the id (and the fingerprint) on every resync.
fn replace_id(stored: &mut String, event_id: &str) -> bool {
    let event_id = event_id.trim();
    if stored
        .to_ascii_lowercase()
        .starts_with(&event_id.to_ascii_lowercase())
    {
        return false;
    }
    replace_if_different(stored, event_id)
}

fn replace_if_different(field: &mut String, value: &str) -> bool {
    if value.is_empty() || *field == value {
        return false;
    }
    *field = value.to_owned();
    true
}
