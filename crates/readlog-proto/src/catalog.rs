//! Catalog of selectable log sources.

use serde::{Deserialize, Serialize};

/// Suffix systemd appends to service unit names.
const UNIT_SUFFIX: &str = ".service";

/// Whether a source is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    /// Running.
    Up,
    /// Stopped, exited, failed or otherwise not running.
    Down,
}

/// One selectable source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Label shown to the user. Stopped sources are prefixed with `*`.
    pub display_name: String,
    /// Identifier to put in a control message's `service_name`.
    pub source_id: String,
    /// Running state.
    pub status: SourceStatus,
}

impl CatalogEntry {
    /// Create an entry for a container as named by the daemon (`/web`).
    #[must_use]
    pub fn container(raw_name: &str, status: SourceStatus) -> Self {
        Self::new(raw_name.trim_start_matches('/'), status)
    }

    /// Create an entry for a systemd unit (`nginx.service`).
    #[must_use]
    pub fn service(unit: &str, status: SourceStatus) -> Self {
        Self::new(strip_unit_suffix(unit), status)
    }

    fn new(id: &str, status: SourceStatus) -> Self {
        let display_name = match status {
            SourceStatus::Up => id.to_string(),
            SourceStatus::Down => format!("*{id}"),
        };
        Self {
            display_name,
            source_id: id.to_string(),
            status,
        }
    }
}

/// Sources of one kind, partitioned by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceGroup {
    /// Running sources.
    pub up: Vec<CatalogEntry>,
    /// Everything else.
    pub down: Vec<CatalogEntry>,
}

impl SourceGroup {
    /// Add an entry to the list matching its status.
    pub fn push(&mut self, entry: CatalogEntry) {
        match entry.status {
            SourceStatus::Up => self.up.push(entry),
            SourceStatus::Down => self.down.push(entry),
        }
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.up.len() + self.down.len()
    }

    /// Whether the group has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }
}

impl FromIterator<CatalogEntry> for SourceGroup {
    fn from_iter<I: IntoIterator<Item = CatalogEntry>>(iter: I) -> Self {
        let mut group = Self::default();
        for entry in iter {
            group.push(entry);
        }
        group
    }
}

/// Every selectable source, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Docker containers.
    pub containers: SourceGroup,
    /// systemd services.
    pub services: SourceGroup,
}

/// Drop the `.service` suffix from a unit name.
#[must_use]
pub fn strip_unit_suffix(unit: &str) -> &str {
    unit.strip_suffix(UNIT_SUFFIX).unwrap_or(unit)
}
