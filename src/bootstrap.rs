//! # NDR Engine Bootstrap
//!
//! Wires the engine together and manages its lifecycle:
//!
//! - [`NdrCore`] assembles every component over one store, one clock and one
//!   resolution queue. Tests build it directly with in-process doubles.
//! - [`NdrBootstrap`] loads configuration, picks the store, starts the
//!   orchestrator, the governor and the HTTP surface, and hands back an
//!   [`NdrSystemHandle`] for graceful shutdown.

use crate::config::{ConfigManager, NdrConfig};
use crate::error::{NdrError, Result};
use crate::governor::{EscalationGovernor, SellerPolicyResolver};
use crate::normalizer::{RuleRegistry, SignalNormalizer};
use crate::orchestration::{
    AdminOverrides, OrchestratorCollaborators, ResolutionOrchestrator, ResolutionQueue, ResolutionTask,
    SignalIngestor,
};
use crate::resilience::{CarrierCircuitBreakers, RetryPolicy};
use crate::resolution::CustomerActionHandler;
use crate::services::{
    CarrierCommands, Clock, Notifier, OrderCommands, OrderReadModel, ProtectedCarrierCommands, SystemClock,
};
use crate::store::{EventMutator, EventStore, InMemoryEventStore};
use crate::tokens::CapabilityTokenService;
use crate::web::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Implementations of the systems the engine talks to
#[derive(Debug, Clone)]
pub struct ExternalServices {
    pub carrier: Arc<dyn CarrierCommands>,
    pub notifier: Arc<dyn Notifier>,
    pub orders: Arc<dyn OrderReadModel>,
    pub order_commands: Arc<dyn OrderCommands>,
}

/// Every engine component, sharing one store, clock and resolution queue
#[derive(Debug, Clone)]
pub struct NdrCore {
    pub store: Arc<dyn EventStore>,
    pub normalizer: Arc<SignalNormalizer>,
    pub ingestor: Arc<SignalIngestor>,
    pub orchestrator: Arc<ResolutionOrchestrator>,
    pub customer: Arc<CustomerActionHandler>,
    pub admin: Arc<AdminOverrides>,
    pub governor: Arc<EscalationGovernor>,
    pub tokens: CapabilityTokenService,
    pub breakers: Arc<CarrierCircuitBreakers>,
    pub clock: Arc<dyn Clock>,
    config: NdrConfig,
}

impl NdrCore {
    /// Assemble the engine. Returns the receiving end of the resolution queue,
    /// which the caller hands to [`ResolutionOrchestrator::start`] or drains itself.
    pub fn new(
        config: NdrConfig,
        rules: RuleRegistry,
        store: Arc<dyn EventStore>,
        services: ExternalServices,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::Receiver<ResolutionTask>)> {
        if config.tokens.secret.is_empty() {
            return Err(NdrError::Configuration("tokens.secret must be set".to_string()));
        }

        let (queue, receiver) = ResolutionQueue::channel(config.orchestrator.queue_capacity);
        let mutator = EventMutator::new(Arc::clone(&store), config.engine.cas_max_retries);
        let normalizer = Arc::new(SignalNormalizer::new(
            rules,
            config.engine.min_classification_confidence,
        ));
        let tokens = CapabilityTokenService::new(
            config.tokens.secret.as_bytes().to_vec(),
            config.tokens.ttl(),
            Arc::clone(&store),
        );
        let breakers = Arc::new(CarrierCircuitBreakers::new(config.circuit_breaker.clone()));
        let carrier = ProtectedCarrierCommands::new(
            Arc::clone(&services.carrier),
            Arc::clone(&breakers),
            RetryPolicy::new(config.carrier_commands.clone()),
        );
        let policies = SellerPolicyResolver::new(
            config.governor.clone(),
            Arc::clone(&services.orders),
            config.orchestrator.collaborator_timeout(),
        );

        let ingestor = Arc::new(SignalIngestor::new(
            Arc::clone(&normalizer),
            mutator.clone(),
            policies.clone(),
            queue.clone(),
            Arc::clone(&clock),
            config.engine.clone(),
        ));
        let orchestrator = Arc::new(ResolutionOrchestrator::new(
            mutator.clone(),
            tokens.clone(),
            OrchestratorCollaborators {
                notifier: Arc::clone(&services.notifier),
                orders: Arc::clone(&services.orders),
                carrier: carrier.clone(),
            },
            policies.clone(),
            queue.clone(),
            Arc::clone(&clock),
            config.engine.clone(),
            config.orchestrator.clone(),
        ));
        let customer = Arc::new(CustomerActionHandler::new(
            tokens.clone(),
            mutator.clone(),
            Arc::clone(&services.orders),
            Arc::clone(&services.order_commands),
            carrier,
            queue.clone(),
            Arc::clone(&clock),
            config.engine.clone(),
            config.orchestrator.collaborator_timeout(),
        ));
        let admin = Arc::new(AdminOverrides::new(mutator.clone(), queue.clone(), Arc::clone(&clock)));
        let governor = Arc::new(EscalationGovernor::new(
            &mutator,
            policies,
            queue,
            Arc::clone(&clock),
            config.engine.clone(),
            config.governor.clone(),
        ));

        let core = Self {
            store,
            normalizer,
            ingestor,
            orchestrator,
            customer,
            admin,
            governor,
            tokens,
            breakers,
            clock,
            config,
        };
        Ok((core, receiver))
    }

    pub fn config(&self) -> &NdrConfig {
        &self.config
    }

    pub fn circuit_breakers_enabled(&self) -> bool {
        self.breakers.is_enabled()
    }
}

/// Lifecycle handle for a running engine
#[derive(Debug)]
pub struct NdrSystemHandle {
    pub core: NdrCore,
    pub config_manager: Arc<ConfigManager>,
    /// Address the HTTP server bound, when it is running
    pub local_addr: Option<std::net::SocketAddr>,
    shutdown_sender: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl NdrSystemHandle {
    pub fn is_running(&self) -> bool {
        !*self.shutdown_sender.borrow()
    }

    /// Signal every loop to stop and wait for them, draining queued side effects
    pub async fn stop(mut self) -> Result<()> {
        if !self.is_running() {
            warn!("NDR engine already stopped");
            return Ok(());
        }
        self.shutdown_sender.send_replace(true);
        info!("🛑 NDR engine shutdown requested");

        for (name, task) in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(component = name, error = %e, "Component task ended abnormally");
            }
        }
        info!("✅ NDR engine stopped");
        Ok(())
    }

    /// Block until ctrl-c, then stop
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c, stopping now");
        }
        self.stop().await
    }
}

#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// Custom configuration directory (None = `NDR_CONFIG_DIR` or `config`)
    pub config_directory: Option<PathBuf>,
    /// Environment override (None = auto-detect)
    pub environment_override: Option<String>,
}

pub struct NdrBootstrap;

impl NdrBootstrap {
    /// Load configuration, then start the engine with the given external services
    pub async fn bootstrap(config: BootstrapConfig, services: ExternalServices) -> Result<NdrSystemHandle> {
        info!("🚀 BOOTSTRAP: Starting NDR engine");

        let config_manager = match &config.environment_override {
            Some(env) => ConfigManager::load_from_directory_with_env(config.config_directory.clone(), env)?,
            None => ConfigManager::load_from_directory(config.config_directory.clone())?,
        };
        Self::bootstrap_with_config(config_manager, services).await
    }

    pub async fn bootstrap_with_config(
        config_manager: Arc<ConfigManager>,
        services: ExternalServices,
    ) -> Result<NdrSystemHandle> {
        let config = config_manager.config().clone();
        config.validate(config_manager.environment())?;
        info!(
            environment = config_manager.environment(),
            circuit_breakers = config.circuit_breaker.enabled,
            "✅ BOOTSTRAP: Configuration loaded"
        );

        let rules = config_manager.load_rule_registry()?;
        let store = Self::open_store(&config).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (core, receiver) = NdrCore::new(config.clone(), rules, store, services, clock)?;

        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push((
            "resolution_orchestrator",
            Arc::clone(&core.orchestrator).start(receiver, shutdown_receiver.clone()),
        ));

        if config.governor.enabled {
            tasks.push((
                "escalation_governor",
                Arc::clone(&core.governor).start(shutdown_receiver.clone()),
            ));
        } else {
            info!("📋 BOOTSTRAP: Escalation governor disabled");
        }

        let mut local_addr = None;
        if config.web.enabled {
            let listener = tokio::net::TcpListener::bind(&config.web.bind_address)
                .await
                .map_err(|e| {
                    NdrError::Configuration(format!("cannot bind {}: {e}", config.web.bind_address))
                })?;
            local_addr = listener.local_addr().ok();
            let app = web::create_app(AppState::new(core.clone(), config_manager.environment()));
            let mut shutdown = shutdown_receiver.clone();
            tasks.push((
                "web_server",
                tokio::spawn(async move {
                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown.changed().await;
                        })
                        .await;
                    if let Err(e) = served {
                        error!(error = %e, "HTTP server failed");
                    }
                }),
            ));
            info!(address = ?local_addr, "🌐 BOOTSTRAP: HTTP server listening");
        }

        info!("🎉 BOOTSTRAP: NDR engine started");
        Ok(NdrSystemHandle {
            core,
            config_manager,
            local_addr,
            shutdown_sender,
            tasks,
        })
    }

    #[cfg(feature = "postgres")]
    async fn open_store(config: &NdrConfig) -> Result<Arc<dyn EventStore>> {
        let Some(url) = config.database.url.as_deref() else {
            info!("📋 BOOTSTRAP: No database.url configured, using in-memory event store");
            return Ok(Arc::new(InMemoryEventStore::new()));
        };
        let store =
            crate::store::PostgresEventStore::connect(url, config.database.max_connections).await?;
        if config.database.run_migrations {
            store.migrate().await?;
        }
        info!("✅ BOOTSTRAP: PostgreSQL event store connected");
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "postgres"))]
    async fn open_store(config: &NdrConfig) -> Result<Arc<dyn EventStore>> {
        if config.database.url.is_some() {
            warn!("database.url is set but the postgres feature is disabled, using in-memory event store");
        }
        Ok(Arc::new(InMemoryEventStore::new()))
    }
}
