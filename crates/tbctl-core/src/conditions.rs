//! Named lifecycle conditions
//!
//! A [`ConditionSet`] is the set of boolean facts the reconciler tracks.
//! Conditions form a DAG of prerequisites: a condition can only be set once
//! its prerequisites hold, and clearing a condition clears everything that
//! depended on it.
//!
//! ```text
//! installed ──┐
//!             ├── backend.requested ── backend.configured ── started ──┬── coordination.enabled
//! backend.sql.connected ─┐                                             ├── transport.announced
//! backend.wide.connected ┴ (either)                                    └── config.changed
//!
//! coordination.ready ── coordination.enabled
//! transport.available ── transport.announced
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// A named lifecycle condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Condition {
    /// Service package is installed
    Installed,
    /// SQL backend relation is present
    SqlConnected,
    /// Wide-column backend relation is present
    WideConnected,
    /// Logical database / keyspace has been requested from the backend
    BackendRequested,
    /// Backend context is bound and the configuration rendered
    BackendConfigured,
    /// Managed service is running
    Started,
    /// Operator configuration differs from what is applied
    ConfigChanged,
    /// Coordination relation supplies peers
    CoordinationReady,
    /// Coordination settings are rendered into the configuration
    CoordinationEnabled,
    /// Transport relation is present
    TransportAvailable,
    /// Port has been announced on the transport relation
    TransportAnnounced,
}

impl Condition {
    /// Every condition, in declaration order
    pub const ALL: [Condition; 11] = [
        Condition::Installed,
        Condition::SqlConnected,
        Condition::WideConnected,
        Condition::BackendRequested,
        Condition::BackendConfigured,
        Condition::Started,
        Condition::ConfigChanged,
        Condition::CoordinationReady,
        Condition::CoordinationEnabled,
        Condition::TransportAvailable,
        Condition::TransportAnnounced,
    ];

    /// Stable dotted name
    pub fn name(&self) -> &'static str {
        match self {
            Condition::Installed => "installed",
            Condition::SqlConnected => "backend.sql.connected",
            Condition::WideConnected => "backend.wide.connected",
            Condition::BackendRequested => "backend.requested",
            Condition::BackendConfigured => "backend.configured",
            Condition::Started => "started",
            Condition::ConfigChanged => "config.changed",
            Condition::CoordinationReady => "coordination.ready",
            Condition::CoordinationEnabled => "coordination.enabled",
            Condition::TransportAvailable => "transport.available",
            Condition::TransportAnnounced => "transport.announced",
        }
    }

    /// Prerequisites in conjunctive form
    ///
    /// Every inner slice must have at least one member set.
    pub fn prerequisites(&self) -> &'static [&'static [Condition]] {
        use Condition::*;
        match self {
            BackendRequested => &[&[Installed], &[SqlConnected, WideConnected]],
            BackendConfigured => &[&[BackendRequested]],
            Started => &[&[BackendConfigured]],
            ConfigChanged => &[&[Started]],
            CoordinationEnabled => &[&[Started], &[CoordinationReady]],
            TransportAnnounced => &[&[Started], &[TransportAvailable]],
            Installed | SqlConnected | WideConnected | CoordinationReady | TransportAvailable => &[],
        }
    }

    /// Whether the condition is observed from outside rather than derived
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Condition::SqlConnected
                | Condition::WideConnected
                | Condition::CoordinationReady
                | Condition::TransportAvailable
        )
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of conditions with prerequisite enforcement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionSet {
    set: BTreeSet<Condition>,
}

impl ConditionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a condition holds
    pub fn contains(&self, condition: Condition) -> bool {
        self.set.contains(&condition)
    }

    /// Whether every prerequisite of `condition` holds
    pub fn prerequisites_met(&self, condition: Condition) -> bool {
        condition
            .prerequisites()
            .iter()
            .all(|any_of| any_of.iter().any(|c| self.set.contains(c)))
    }

    /// Set a condition
    ///
    /// Returns `Ok(true)` if it was newly set, `Ok(false)` if it already held.
    /// Fails without changing anything if a prerequisite is missing.
    pub fn set(&mut self, condition: Condition) -> Result<bool> {
        if self.set.contains(&condition) {
            return Ok(false);
        }

        if !self.prerequisites_met(condition) {
            let missing: Vec<String> = condition
                .prerequisites()
                .iter()
                .filter(|any_of| !any_of.iter().any(|c| self.set.contains(c)))
                .map(|any_of| {
                    any_of
                        .iter()
                        .map(Condition::name)
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .collect();
            return Err(Error::condition(format!(
                "cannot set {}: missing {}",
                condition,
                missing.join(", ")
            )));
        }

        self.set.insert(condition);
        Ok(true)
    }

    /// Clear a condition and everything that depended on it
    ///
    /// Returns every condition that was removed, including `condition`
    /// itself if it was set.
    pub fn clear(&mut self, condition: Condition) -> Vec<Condition> {
        let mut cleared = Vec::new();
        if self.set.remove(&condition) {
            cleared.push(condition);
        }

        loop {
            let orphaned: Vec<Condition> = self
                .set
                .iter()
                .copied()
                .filter(|c| !self.prerequisites_met(*c))
                .collect();

            if orphaned.is_empty() {
                break;
            }
            for c in orphaned {
                self.set.remove(&c);
                cleared.push(c);
            }
        }

        cleared
    }

    /// Set or clear a condition to match `value`
    pub fn assign(&mut self, condition: Condition, value: bool) -> Result<Vec<Condition>> {
        if value {
            self.set(condition)?;
            Ok(Vec::new())
        } else {
            Ok(self.clear(condition))
        }
    }

    /// Iterate over held conditions in a stable order
    pub fn iter(&self) -> impl Iterator<Item = Condition> + '_ {
        self.set.iter().copied()
    }

    /// Number of held conditions
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Whether no condition holds
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl fmt::Display for ConditionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.set.iter().map(Condition::name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
