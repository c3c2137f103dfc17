//! Per-session service.
//!
//! One `SessionService` exists per client connection to a session host.
//! It owns every application handle created over that connection and
//! releases them, in creation order, when the client calls
//! `close_connection` or the connection goes away.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` outside tests
//! - Application and launcher failures become `Failure` values
//! - Teardown never fails: per-handle errors are logged and skipped

mod application;
mod script;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use simbroker_core::{AppRequest, Failure, Outcome, Platform, ScriptConfig};
use simbroker_protocol::{Call, ReplyValue, ServiceRole};
use tracing::{debug, info, warn};

use crate::objects::{ObjectTable, RemoteObject};
use crate::server::{handle_shared_call, CallHandler};

pub use application::{ApplicationFactory, ApplicationHandle, DesktopApplication, DesktopFactory};
pub use script::{run_script, SCRIPT_PREFIX};

/// Host-wide settings shared by every session on one host.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub platform: Platform,

    /// Fallback installation root for script launchers
    pub install_root: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
            install_root: None,
        }
    }
}

/// Service answering one client connection on a session host.
pub struct SessionService {
    objects: ObjectTable,
    factory: Arc<dyn ApplicationFactory>,
    settings: SessionSettings,
}

impl SessionService {
    pub fn new(factory: Arc<dyn ApplicationFactory>, settings: SessionSettings) -> Self {
        Self {
            objects: ObjectTable::new(),
            factory,
            settings,
        }
    }

    /// Number of live application handles owned by this session.
    pub fn application_count(&self) -> usize {
        self.objects.application_count()
    }

    /// Creates an application and records its handle.
    ///
    /// A kind unsupported on this platform fails immediately without
    /// touching the factory. A failed creation leaves no handle behind.
    pub async fn create(&mut self, request: AppRequest) -> Outcome<ReplyValue> {
        let kind = request.kind();
        if !kind.is_supported_on(self.settings.platform) {
            warn!(
                kind = %kind,
                platform = %self.settings.platform,
                "Application kind not supported on this platform"
            );
            return Outcome::failure(Failure::unsupported(format!(
                "{kind} is not supported on {}",
                self.settings.platform
            )));
        }

        match self.factory.create(&request).await {
            Ok(handle) => {
                let reference = self.objects.insert(RemoteObject::Application(handle));
                info!(kind = %kind, object = %reference.id, "Application created");
                Outcome::success(ReplyValue::Object(reference))
            }
            Err(failure) => {
                warn!(kind = %kind, error = %failure, "Application creation failed");
                Outcome::failure(failure)
            }
        }
    }

    pub async fn run_script(&self, script: &[String], config: &ScriptConfig) -> Outcome<ReplyValue> {
        run_script(
            script,
            config,
            self.settings.install_root.as_deref(),
            self.settings.platform,
        )
        .await
        .map(ReplyValue::Status)
        .into()
    }

    /// Releases every application handle; always succeeds.
    pub async fn close_connection(&mut self) -> Outcome<ReplyValue> {
        let released = self.objects.release_applications().await;
        debug!(released, "Session closed its applications");
        Outcome::success(ReplyValue::Bool(true))
    }
}

#[async_trait]
impl CallHandler for SessionService {
    fn role(&self) -> ServiceRole {
        ServiceRole::Session
    }

    async fn handle(&mut self, call: Call) -> Outcome<ReplyValue> {
        let call = match handle_shared_call(&mut self.objects, call).await {
            Ok(outcome) => return outcome,
            Err(call) => call,
        };
        match call {
            Call::CreateApplication { request } => self.create(request).await,
            Call::RunScript { script, config } => self.run_script(&script, &config).await,
            Call::CloseConnection => self.close_connection().await,
            other => Outcome::failure(Failure::unsupported(format!(
                "'{}' is not served by a session host",
                other.name()
            ))),
        }
    }

    async fn teardown(&mut self) {
        let released = self.objects.release_all().await;
        if released > 0 {
            info!(released, "Session torn down");
        }
    }
}
