//! Service wiring: build every component from config and run the server and
//! the sweep scheduler until shutdown.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{ApiServer, AppState};
use crate::billing::UsageCalculator;
use crate::config::Config;
use crate::db::Database;
use crate::lifecycle::BotStateStore;
use crate::provider::{BotProvider, RecallClient};
use crate::reconcile::{run_scheduler, ReconciliationPoller};
use crate::recording::RecordingResolver;
use crate::session::SessionTerminator;
use crate::summary::{self, SummaryService};
use crate::webhook::{WebhookHandler, WebhookVerifier};

/// All engine components, sharing one database handle.
#[derive(Clone)]
pub struct Services {
    pub store: BotStateStore,
    pub billing: UsageCalculator,
    pub resolver: RecordingResolver,
    pub terminator: SessionTerminator,
    pub webhooks: WebhookHandler,
    pub poller: ReconciliationPoller,
}

impl Services {
    pub fn build(
        config: &Config,
        db: Database,
        provider: Arc<dyn BotProvider>,
        summary: Arc<dyn SummaryService>,
    ) -> Self {
        let call_timeout = config.provider.request_timeout();
        let store = BotStateStore::new(db.clone());
        let billing = UsageCalculator::new(db, config.billing.clone());
        let resolver = RecordingResolver::new(store.clone(), provider.clone(), call_timeout);
        let terminator = SessionTerminator::new(
            store.clone(),
            provider.clone(),
            billing.clone(),
            summary,
            call_timeout,
            config.summary.redirect_template.clone(),
        );
        let webhooks = WebhookHandler::new(
            WebhookVerifier::from_config(&config.webhook),
            store.clone(),
            billing.clone(),
            resolver.clone(),
        );
        let poller = ReconciliationPoller::new(
            store.clone(),
            provider,
            billing.clone(),
            resolver.clone(),
            terminator.clone(),
            config.reconcile.clone(),
            call_timeout,
        );

        Self {
            store,
            billing,
            resolver,
            terminator,
            webhooks,
            poller,
        }
    }

    /// Build with the vendor client and summary service named in `config`.
    pub fn from_config(config: &Config, db: Database) -> Result<Self> {
        let provider: Arc<dyn BotProvider> = Arc::new(RecallClient::from_config(&config.provider)?);
        let summary = summary::from_config(&config.summary)?;
        Ok(Self::build(config, db, provider, summary))
    }

    pub fn app_state(&self, config: &Config) -> AppState {
        AppState {
            store: self.store.clone(),
            billing: self.billing.clone(),
            webhooks: self.webhooks.clone(),
            terminator: self.terminator.clone(),
            resolver: self.resolver.clone(),
            poller: self.poller.clone(),
            admin_token: config.admin.token.clone(),
            cron_secret: config.reconcile.cron_secret.clone(),
            sync_limit: config.reconcile.batch_limit,
        }
    }
}

pub async fn run_service() -> Result<()> {
    info!("Starting meetbot service");

    let config = Config::load()?;
    if config.webhook.secret.is_none() && config.webhook.signing_secret.is_none() {
        warn!("No webhook secret configured; every webhook delivery will be rejected");
    }

    let db = Database::open_default()?;
    let services = Services::from_config(&config, db)?;
    let cancel = CancellationToken::new();

    let scheduler = if config.reconcile.enabled {
        let poller = services.poller.clone();
        let interval = config.reconcile.interval();
        let token = cancel.clone();
        Some(tokio::spawn(run_scheduler(poller, interval, token)))
    } else {
        info!("Reconciliation scheduler disabled; use /cron/reconcile or `meetbot reconcile`");
        None
    };

    let server = ApiServer::new(
        config.server.bind.clone(),
        config.server.port,
        services.app_state(&config),
    );
    let server_token = cancel.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.start(server_token.clone()).await {
            error!("API server failed: {:#}", e);
            server_token.cancel();
        }
    });

    info!("meetbot is ready!");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    if let Err(e) = server_task.await {
        error!("API server task panicked: {}", e);
    }
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!("Scheduler task panicked: {}", e);
        }
    }

    info!("meetbot stopped");
    Ok(())
}
