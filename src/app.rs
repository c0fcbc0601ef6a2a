/// Composition root
///
/// Builds every component once, wires them together explicitly and hands the
/// long-running parts to the service manager. Nothing here is global.
use std::sync::Arc;

use crate::bridge::{BrokerTransport, LoopbackTransport, MessageBridge};
use crate::commands::CommandService;
use crate::config::Config;
use crate::errors::{PersistenceError, SessionError};
use crate::hub::BroadcastHub;
use crate::jobs::{JobQueue, TrainingRunner};
use crate::logger::{self, LogTag};
use crate::services::implementations::{BridgeService, JobWorkerService, TelemetryFlushService};
use crate::services::ServiceManager;
use crate::sessions::SessionRegistry;
use crate::storage::{CommandAudit, JobStore, MemoryStore, SessionStore, SqliteStore, TelemetryStore};
use crate::telemetry::TelemetryPipeline;

/// Storage handles, one per persistence concern
#[derive(Clone)]
pub struct Stores {
    pub telemetry: Arc<dyn TelemetryStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub jobs: Arc<dyn JobStore>,
    pub audit: Arc<dyn CommandAudit>,
}

impl Stores {
    pub fn sqlite(store: Arc<SqliteStore>) -> Self {
        Self {
            telemetry: store.clone(),
            sessions: store.clone(),
            jobs: store.clone(),
            audit: store,
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            telemetry: store.clone(),
            sessions: store.clone(),
            jobs: store.clone(),
            audit: store,
        }
    }

    /// SQLite at `database.path`, or in-memory when the path is empty
    pub fn open(config: &Config) -> Result<Self, PersistenceError> {
        if config.database.path.is_empty() {
            logger::warning(
                LogTag::Storage,
                "No database path configured, records are kept in memory only",
            );
            return Ok(Self::memory(Arc::new(MemoryStore::new())));
        }
        Ok(Self::sqlite(Arc::new(SqliteStore::open(&config.database)?)))
    }
}

pub struct App {
    pub config: Config,
    pub hub: Arc<BroadcastHub>,
    pub bridge: Arc<MessageBridge>,
    pub registry: Arc<SessionRegistry>,
    pub pipeline: Arc<TelemetryPipeline>,
    pub jobs: Arc<JobQueue>,
    pub commands: Arc<CommandService>,
}

impl App {
    /// Open storage from config and use the in-process broker
    pub fn build(config: Config) -> Result<Self, PersistenceError> {
        let stores = Stores::open(&config)?;
        Ok(Self::with_parts(config, stores, Arc::new(LoopbackTransport::new())))
    }

    pub fn with_parts(config: Config, stores: Stores, transport: Arc<dyn BrokerTransport>) -> Self {
        let hub = BroadcastHub::new(&config.hub);
        let bridge = MessageBridge::new(transport, &config.bridge);
        let registry = SessionRegistry::new(
            stores.sessions.clone(),
            stores.telemetry.clone(),
            &config.sessions,
        );
        let pipeline = TelemetryPipeline::new(
            registry.clone(),
            hub.clone(),
            stores.telemetry.clone(),
            &config.telemetry,
        );

        let jobs = JobQueue::new(hub.clone(), stores.jobs.clone(), &config.jobs);
        jobs.register_runner("training", Arc::new(TrainingRunner::default()));

        let commands = Arc::new(CommandService::new(
            bridge.clone(),
            hub.clone(),
            Some(stores.audit.clone()),
            &config,
        ));

        Self {
            config,
            hub,
            bridge,
            registry,
            pipeline,
            jobs,
            commands,
        }
    }

    /// Reload active sessions when configured to
    pub async fn restore_sessions(&self) -> Result<usize, SessionError> {
        if !self.config.sessions.restore_on_start {
            return Ok(0);
        }
        self.registry.restore().await
    }

    /// Service manager with every long-running part registered
    pub fn service_manager(&self) -> ServiceManager {
        let mut manager = ServiceManager::new();

        manager.register(Box::new(TelemetryFlushService::new(
            self.pipeline.clone(),
            self.config.telemetry.flush_interval(),
        )));
        manager.register(Box::new(BridgeService::new(
            self.bridge.clone(),
            self.pipeline.clone(),
            &self.config.fleet.name,
            self.config.bridge.connect_on_start,
        )));
        manager.register(Box::new(JobWorkerService::new(self.jobs.clone())));

        #[cfg(feature = "web")]
        {
            use crate::services::implementations::WebserverService;
            use crate::webserver::WebState;

            let state = WebState {
                hub: self.hub.clone(),
                commands: Some(self.commands.clone()),
                pipeline: self.pipeline.clone(),
                jobs: self.jobs.clone(),
            };
            manager.register(Box::new(WebserverService::new(
                state,
                &self.config.webserver.bind,
                self.config.webserver.enabled,
            )));
        }

        manager
    }
}
