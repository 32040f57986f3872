//! Discovery of the containers and services a client can watch.

use std::process::Stdio;

use bollard::container::ListContainersOptions;
use readlog_proto::{Catalog, CatalogEntry, SourceGroup, SourceStatus};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::container::DockerLogs;
use crate::error::{SourceError, SourceResult};

/// Default service manager program.
pub const DEFAULT_SYSTEMCTL: &str = "systemctl";

/// Lists containers from the Docker daemon and units from systemd.
#[derive(Debug, Clone)]
pub struct CatalogProvider {
    docker: DockerLogs,
    systemctl: String,
    unit_filter: Option<Regex>,
}

impl CatalogProvider {
    /// Use the local Docker daemon and `systemctl` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            docker: DockerLogs::default(),
            systemctl: DEFAULT_SYSTEMCTL.to_string(),
            unit_filter: None,
        }
    }

    /// Use a specific Docker endpoint.
    #[must_use]
    pub fn with_docker(mut self, docker: DockerLogs) -> Self {
        self.docker = docker;
        self
    }

    /// Use a specific `systemctl` binary.
    #[must_use]
    pub fn with_systemctl(mut self, program: impl Into<String>) -> Self {
        self.systemctl = program.into();
        self
    }

    /// Only list units whose name (without `.service`) matches `filter`.
    #[must_use]
    pub fn with_unit_filter(mut self, filter: Regex) -> Self {
        self.unit_filter = Some(filter);
        self
    }

    /// List every container, running or not.
    pub async fn containers(&self) -> SourceResult<SourceGroup> {
        let docker = self.docker.connect()?;
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let summaries = docker.list_containers(Some(options)).await?;

        let mut group: SourceGroup = summaries
            .into_iter()
            .filter_map(|c| {
                let name = c.names.and_then(|n| n.first().cloned())?;
                let status = if c.state.as_deref() == Some("running") {
                    SourceStatus::Up
                } else {
                    SourceStatus::Down
                };
                Some(CatalogEntry::container(&name, status))
            })
            .collect();
        sort_group(&mut group);
        Ok(group)
    }

    /// List every service unit known to systemd.
    pub async fn services(&self) -> SourceResult<SourceGroup> {
        let output = Command::new(&self.systemctl)
            .args([
                "list-units",
                "--all",
                "--type=service",
                "--no-legend",
                "--plain",
                "--no-pager",
            ])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| SourceError::spawn(&self.systemctl, e.to_string()))?;

        if !output.status.success() {
            return Err(SourceError::Exited {
                program: self.systemctl.clone(),
                status: output.status.to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(parse_unit_listing(&text, self.unit_filter.as_ref()))
    }

    /// List both groups. A group whose backend is unavailable is left empty.
    pub async fn collect(&self) -> Catalog {
        let (containers, services) = tokio::join!(self.containers(), self.services());

        let containers = containers.unwrap_or_else(|e| {
            warn!(error = %e, "Could not list containers");
            SourceGroup::default()
        });
        let services = services.unwrap_or_else(|e| {
            warn!(error = %e, "Could not list services");
            SourceGroup::default()
        });

        debug!(
            containers = containers.len(),
            services = services.len(),
            "Catalog collected"
        );
        Catalog {
            containers,
            services,
        }
    }
}

impl Default for CatalogProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `systemctl list-units --plain --no-legend` output.
///
/// Columns are `UNIT LOAD ACTIVE SUB DESCRIPTION...`; a unit is up when its
/// `SUB` state is `running`. Lines with fewer than four columns are skipped.
pub fn parse_unit_listing(text: &str, filter: Option<&Regex>) -> SourceGroup {
    let mut group: SourceGroup = text
        .lines()
        .filter_map(|line| {
            let line = line.trim_start().trim_start_matches(['●', '*']);
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 4 {
                return None;
            }
            let status = if columns[3] == "running" {
                SourceStatus::Up
            } else {
                SourceStatus::Down
            };
            Some(CatalogEntry::service(columns[0], status))
        })
        .filter(|entry| filter.is_none_or(|re| re.is_match(&entry.source_id)))
        .collect();
    sort_group(&mut group);
    group
}

fn sort_group(group: &mut SourceGroup) {
    group.up.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    group.down.sort_by(|a, b| a.source_id.cmp(&b.source_id));
}
