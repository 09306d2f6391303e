//! Per-type routing decisions.
//!
//! A routed type pins each document to the shard chosen by the value of its routing
//! property. While migrating a type between a routed and an unrouted layout, routing can
//! be suppressed for reads and writes independently. Suppression can be changed at any
//! time and is consulted on every access.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::client::call_site;
use crate::config::RoutingConfig;
use crate::schema::EntityDescriptor;

/// Kind of access a routing decision is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Searches and gets.
    Read,
    /// Index, update and delete requests.
    Write,
}

/// Routing suppression per relation and access mode.
#[derive(Debug, Default)]
pub struct RoutingTable {
    suppressed_reads: RwLock<HashSet<String>>,
    suppressed_writes: RwLock<HashSet<String>>,
}

impl RoutingTable {
    /// Creates a table with the suppressions of the given configuration.
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            suppressed_reads: RwLock::new(config.suppressed_reads.iter().cloned().collect()),
            suppressed_writes: RwLock::new(config.suppressed_writes.iter().cloned().collect()),
        }
    }

    fn set(&self, mode: AccessMode) -> &RwLock<HashSet<String>> {
        match mode {
            AccessMode::Read => &self.suppressed_reads,
            AccessMode::Write => &self.suppressed_writes,
        }
    }

    /// Ignores routing values of `relation` for the given access mode.
    pub fn suppress(&self, relation: &str, mode: AccessMode) {
        tracing::info!("Suppressing {:?} routing for {}", mode, relation);
        self.set(mode).write().insert(relation.to_string());
    }

    /// Reverts [`suppress`](Self::suppress).
    pub fn unsuppress(&self, relation: &str, mode: AccessMode) {
        tracing::info!("Enabling {:?} routing for {}", mode, relation);
        self.set(mode).write().remove(relation);
    }

    /// Returns true if routing of `relation` is suppressed for the given access mode.
    pub fn is_suppressed(&self, relation: &str, mode: AccessMode) -> bool {
        self.set(mode).read().contains(relation)
    }

    /// Returns true if accesses of the given mode must carry a routing value.
    pub fn is_routed(&self, descriptor: &EntityDescriptor, mode: AccessMode) -> bool {
        descriptor.is_routed() && !self.is_suppressed(descriptor.relation(), mode)
    }

    /// Returns the routing value to send, dropping it if routing is suppressed.
    pub fn filter_routing(
        &self,
        descriptor: &EntityDescriptor,
        mode: AccessMode,
        routing: Option<&str>,
    ) -> Option<String> {
        if self.is_suppressed(descriptor.relation(), mode) {
            return None;
        }
        routing.filter(|r| !r.is_empty()).map(str::to_string)
    }

    /// Logs a warning if the presence of a routing value does not match the type.
    ///
    /// The access proceeds either way, but most probably yields a wrong result.
    pub fn check_routing(
        &self,
        descriptor: &EntityDescriptor,
        mode: AccessMode,
        routing: Option<&str>,
        action: &str,
    ) -> bool {
        let has_routing = routing.is_some_and(|r| !r.is_empty());
        let routed = self.is_routed(descriptor, mode);

        if routed && !has_routing {
            tracing::warn!(
                "Trying to {} an entity of type '{}' without providing a routing! \
                 This will most probably return an invalid result!\n{}",
                action,
                descriptor.type_name(),
                call_site()
            );
            return false;
        }

        if !routed && has_routing {
            tracing::warn!(
                "Trying to {} an entity of type '{}' with a routing although the type is not routed! \
                 This will most probably return an invalid result!\n{}",
                action,
                descriptor.type_name(),
                call_site()
            );
            return false;
        }

        true
    }
}
