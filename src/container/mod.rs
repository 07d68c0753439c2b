//! Container record model.
//!
//! A [`ContainerRecord`] is one container as observed through the engine's
//! listing primitive, optionally enriched with externally discovered
//! [`TunnelState`]. Records carry no behavior beyond their canonical ordering
//! (see [`sort_containers`]) and the matching heuristics in [`matching`].
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

pub mod matching;

pub use matching::{display_name, ids_match, names_match};

/// Reachability of a container through an external tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Blocked,
    Active,
    Pending,
}

impl TunnelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Blocked => "blocked",
            TunnelStatus::Active => "active",
            TunnelStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally owned reachability fact for a single container, keyed by container id.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TunnelState {
    pub status: TunnelStatus,
    pub code: String,
    pub message: String,
}

impl TunnelState {
    pub fn new(status: TunnelStatus, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// One observed container.
///
/// `id` may be the full engine identifier (listings) or a truncated one
/// (some event feeds). `labels` is `None` when the engine reported no usable
/// labels, never an empty map.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_size: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ports: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_status: Option<TunnelStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_message: Option<String>,
}

impl ContainerRecord {
    /// Key used for the canonical ordering: the name, or the id for unnamed containers.
    pub fn sort_key(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Copies the given tunnel state onto the display fields, or clears them.
    pub fn set_tunnel_state(&mut self, state: Option<&TunnelState>) {
        match state {
            Some(state) => {
                self.tunnel_status = Some(state.status);
                self.tunnel_code = Some(state.code.clone());
                self.tunnel_message = Some(state.message.clone());
            }
            None => {
                self.tunnel_status = None;
                self.tunnel_code = None;
                self.tunnel_message = None;
            }
        }
    }
}

/// Total order over records: by [`ContainerRecord::sort_key`], ties broken by `id`.
pub fn canonical_order(left: &ContainerRecord, right: &ContainerRecord) -> Ordering {
    left.sort_key()
        .cmp(right.sort_key())
        .then_with(|| left.id.cmp(&right.id))
}

/// Sorts a snapshot into canonical order so that equal content always
/// produces the same sequence regardless of arrival order.
pub fn sort_containers(containers: &mut [ContainerRecord]) {
    containers.sort_by(canonical_order);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, name: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.to_owned(),
            name: name.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sort_by_name_then_id() {
        let mut containers = vec![
            record("c3", "web"),
            record("b2", "api"),
            record("a1", "web"),
        ];
        sort_containers(&mut containers);
        let ids: Vec<&str> = containers.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "a1", "c3"]);
    }

    #[test]
    fn test_sort_unnamed_falls_back_to_id() {
        let mut containers = vec![record("zzz", "mmm"), record("aaa", "")];
        sort_containers(&mut containers);
        assert_eq!(containers[0].id, "aaa");
        assert_eq!(containers[1].id, "zzz");
    }

    #[test]
    fn test_sort_is_independent_of_arrival_order() {
        let mut forward = vec![record("1", "a"), record("2", "b"), record("3", "")];
        let mut backward: Vec<ContainerRecord> = forward.iter().rev().cloned().collect();
        sort_containers(&mut forward);
        sort_containers(&mut backward);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_set_tunnel_state_and_clear() {
        let mut container = record("abc", "ws");
        let state = TunnelState::new(TunnelStatus::Blocked, "ABCD-EFGH", "awaiting approval");
        container.set_tunnel_state(Some(&state));
        assert_eq!(container.tunnel_status, Some(TunnelStatus::Blocked));
        assert_eq!(container.tunnel_code.as_deref(), Some("ABCD-EFGH"));

        container.set_tunnel_state(None);
        assert_eq!(container.tunnel_status, None);
        assert_eq!(container.tunnel_code, None);
        assert_eq!(container.tunnel_message, None);
        assert_eq!(container.id, "abc");
    }

    #[test]
    fn test_serialize_omits_absent_fields() {
        let mut container = record("abc", "ws");
        container.status = "Running".to_owned();
        let value = serde_json::to_value(&container).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"id": "abc", "name": "ws", "image": "", "status": "Running"})
        );

        container.storage_size = "12kB".to_owned();
        container.tunnel_status = Some(TunnelStatus::Active);
        let value = serde_json::to_value(&container).unwrap();
        assert_eq!(value["storageSize"], "12kB");
        assert_eq!(value["tunnelStatus"], "active");
    }
}
