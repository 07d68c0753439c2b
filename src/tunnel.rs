//! Tunnel enrichment.
//!
//! Tunnel reachability is discovered by an external collaborator implementing
//! [`TunnelDiscovery`]. Once per full resync the reconciliation service asks
//! it for fresh facts, then [`merge`]s them into its table, [`prune`]s entries
//! whose container is gone and [`enrich`]es the snapshot for display.
use std::collections::HashMap;
use std::future::Future;

use crate::container::{ContainerRecord, TunnelState, ids_match};

/// Tunnel state keyed by container id.
pub type TunnelTable = HashMap<String, TunnelState>;

/// Source of per-container tunnel reachability.
pub trait TunnelDiscovery {
    /// Returns the tunnel facts known for the given live containers, keyed by container id.
    fn discover(
        &self,
        containers: &[ContainerRecord],
    ) -> impl Future<Output = TunnelTable> + Send;
}

/// Discovery for deployments without tunnels: never reports anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTunnelDiscovery;

impl TunnelDiscovery for NoTunnelDiscovery {
    async fn discover(&self, _containers: &[ContainerRecord]) -> TunnelTable {
        TunnelTable::new()
    }
}

/// Overlays newly discovered facts onto the table. Discovery wins on conflict.
pub fn merge(table: &mut TunnelTable, discovered: TunnelTable) {
    table.extend(discovered);
}

/// Drops every entry whose container id no longer matches a live container.
pub fn prune(table: &mut TunnelTable, live: &[ContainerRecord]) {
    table.retain(|key, _| live.iter().any(|container| ids_match(key, &container.id)));
}

/// Removes every entry belonging to the given container id.
pub fn evict(table: &mut TunnelTable, container_id: &str) {
    table.retain(|key, _| !ids_match(key, container_id));
}

/// Copies the matching table entry onto each record's tunnel display fields,
/// clearing them for records without an entry. Identity fields are untouched.
pub fn enrich(containers: &mut [ContainerRecord], table: &TunnelTable) {
    for container in containers.iter_mut() {
        let state = lookup(table, &container.id);
        container.set_tunnel_state(state);
    }
}

fn lookup<'a>(table: &'a TunnelTable, container_id: &str) -> Option<&'a TunnelState> {
    if container_id.trim().is_empty() {
        return None;
    }
    if let Some(state) = table.get(container_id) {
        return Some(state);
    }

    // prefer the longest (most specific) key when several ids prefix-match
    table
        .iter()
        .filter(|(key, _)| ids_match(key, container_id))
        .max_by(|(left, _), (right, _)| left.len().cmp(&right.len()).then_with(|| right.cmp(left)))
        .map(|(_, state)| state)
}
