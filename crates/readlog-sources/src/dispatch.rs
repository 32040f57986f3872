//! Routing a request to the producer variant that serves it.

use std::sync::Arc;

use readlog_proto::{LogRequest, RequestMode, SourceKind};

use crate::container::{container_history, follow_container, ContainerLogSource, DockerLogs};
use crate::producer::ProducerHandle;
use crate::service::{follow_service, service_history, Journalctl, ServiceCommand};
use crate::sink::RecordSink;

/// The container and service backends a session draws producers from.
#[derive(Debug)]
pub struct LogSources<C, J> {
    containers: Arc<C>,
    services: Arc<J>,
}

impl<C, J> LogSources<C, J>
where
    C: ContainerLogSource,
    J: ServiceCommand,
{
    /// Combine two backends.
    pub fn new(containers: C, services: J) -> Self {
        Self {
            containers: Arc::new(containers),
            services: Arc::new(services),
        }
    }

    /// The container backend.
    pub fn containers(&self) -> &Arc<C> {
        &self.containers
    }

    /// The service backend.
    pub fn services(&self) -> &Arc<J> {
        &self.services
    }

    /// Start the producer for `request`, writing to `sink`.
    pub fn spawn<S: RecordSink>(&self, request: LogRequest, sink: S) -> ProducerHandle {
        let label = format!(
            "{}:{}:{}",
            request.kind,
            request.log_mode(),
            request.source
        );
        let LogRequest { kind, source, mode } = request;

        match (kind, mode) {
            (SourceKind::Container, RequestMode::Follow) => {
                let containers = Arc::clone(&self.containers);
                ProducerHandle::spawn(label, move |cancel| {
                    follow_container(containers, source, sink, cancel)
                })
            }
            (SourceKind::Container, RequestMode::History(query)) => {
                let containers = Arc::clone(&self.containers);
                ProducerHandle::spawn(label, move |cancel| {
                    container_history(containers, source, query, sink, cancel)
                })
            }
            (SourceKind::Service, RequestMode::Follow) => {
                let services = Arc::clone(&self.services);
                ProducerHandle::spawn(label, move |cancel| {
                    follow_service(services, source, sink, cancel)
                })
            }
            (SourceKind::Service, RequestMode::History(query)) => {
                let services = Arc::clone(&self.services);
                ProducerHandle::spawn(label, move |cancel| {
                    service_history(services, source, query, sink, cancel)
                })
            }
        }
    }
}

impl LogSources<DockerLogs, Journalctl> {
    /// The local Docker daemon and `journalctl`.
    #[must_use]
    pub fn system() -> Self {
        Self::new(DockerLogs::default(), Journalctl::new())
    }
}

impl<C, J> Clone for LogSources<C, J> {
    fn clone(&self) -> Self {
        Self {
            containers: Arc::clone(&self.containers),
            services: Arc::clone(&self.services),
        }
    }
}
