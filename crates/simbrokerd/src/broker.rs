//! Global broker service.
//!
//! Answers `start_service`, `stop_service` and `list_services` against the
//! shared port registry, plus the file primitives every role serves.

use async_trait::async_trait;
use simbroker_core::{Failure, Outcome};
use simbroker_protocol::{Call, ReplyValue, ServiceRole};
use tracing::{debug, info};

use crate::objects::ObjectTable;
use crate::registry::RegistryHandle;
use crate::server::{handle_shared_call, CallHandler};

/// Service answering one client connection on the broker.
pub struct BrokerService {
    registry: RegistryHandle,

    /// File handles opened over this connection
    objects: ObjectTable,
}

impl BrokerService {
    pub fn new(registry: RegistryHandle) -> Self {
        Self {
            registry,
            objects: ObjectTable::new(),
        }
    }

    /// Launches a session host and returns its port.
    pub async fn start_service(&self, hostname: &str) -> Outcome<ReplyValue> {
        match self.registry.start_service(hostname).await {
            Ok(port) => {
                info!(port, hostname, "Session service started");
                Outcome::success(ReplyValue::Port(port))
            }
            Err(e) => Outcome::failure(Failure::from(e)),
        }
    }

    pub async fn stop_service(&self, port: u16) -> Outcome<ReplyValue> {
        match self.registry.stop_service(port).await {
            Ok(stopped) => Outcome::success(ReplyValue::Bool(stopped)),
            Err(e) => Outcome::failure(Failure::from(e)),
        }
    }

    pub async fn list_services(&self) -> Outcome<ReplyValue> {
        Outcome::success(ReplyValue::Services(self.registry.list_services().await))
    }
}

#[async_trait]
impl CallHandler for BrokerService {
    fn role(&self) -> ServiceRole {
        ServiceRole::Broker
    }

    async fn handle(&mut self, call: Call) -> Outcome<ReplyValue> {
        let call = match handle_shared_call(&mut self.objects, call).await {
            Ok(outcome) => return outcome,
            Err(call) => call,
        };
        match call {
            Call::StartService { hostname } => self.start_service(&hostname).await,
            Call::StopService { port } => self.stop_service(port).await,
            Call::ListServices => self.list_services().await,
            other => {
                debug!(call = other.name(), "Session call sent to broker");
                Outcome::failure(Failure::unsupported(format!(
                    "'{}' is served by session hosts, not the broker",
                    other.name()
                )))
            }
        }
    }

    async fn teardown(&mut self) {
        self.objects.release_all().await;
    }
}
