use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledger_bot::bot::{router, ConversationEngine, EngineSettings, WebhookState};
use ledger_bot::clock::SystemClock;
use ledger_bot::config::{Config, LedgerBackend};
use ledger_bot::ledger::postgres::init_schema;
use ledger_bot::ledger::{LedgerStore, PgLedger, ServiceAccountKey, SheetsLedger};
use ledger_bot::localization::get_localization_manager;
use ledger_bot::media::HttpMediaStore;
use ledger_bot::messaging::WhatsAppMessenger;
use ledger_bot::session_store::SessionStore;

/// Upper bound for any single HTTP request made by the gateways
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn build_ledger(config: &Config, client: &reqwest::Client) -> Result<Arc<dyn LedgerStore>> {
    match &config.ledger {
        LedgerBackend::Sheets {
            spreadsheet_id,
            service_account_file,
            api_base,
        } => {
            let key = ServiceAccountKey::from_file(service_account_file)?;
            info!(client_email = %key.client_email, "Using Google Sheets ledger");
            let ledger = SheetsLedger::with_service_account(
                client.clone(),
                api_base.clone(),
                spreadsheet_id.clone(),
                key,
            )?
            .layout(config.layout.clone());
            Ok(Arc::new(ledger))
        }
        LedgerBackend::Postgres { database_url } => {
            info!("Using PostgreSQL ledger");
            let pool = PgPool::connect(database_url)
                .await
                .context("Failed to connect to the ledger database")?;
            init_schema(&pool).await?;
            Ok(Arc::new(PgLedger::new(pool).admin_name(config.layout.admin_name.clone())))
        }
    }
}

/// Periodically drop conversations nobody has touched within `max_idle`
fn spawn_session_sweeper(sessions: Arc<SessionStore>, max_idle: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let evicted = sessions.evict_idle(max_idle);
            if evicted > 0 {
                info!(evicted, remaining = sessions.len(), "Idle sessions evicted");
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;
    init_logging(config.json_logs);

    info!(language = %config.language, port = config.port, "Starting ledger bot");

    let localization = get_localization_manager().context("Message catalogues failed to load")?;
    if !localization.supports(&config.language) {
        tracing::warn!(language = %config.language, "Unsupported BOT_LANGUAGE, falling back to Spanish");
    }

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let ledger = build_ledger(&config, &client).await?;
    let messenger = Arc::new(
        WhatsAppMessenger::new(
            client.clone(),
            config.whatsapp_api_base.clone(),
            config.phone_number_id.clone(),
            config.whatsapp_token.clone(),
        )
        .language(&config.language),
    );
    let media = Arc::new(
        HttpMediaStore::new(
            client.clone(),
            config.whatsapp_api_base.clone(),
            config.whatsapp_token.clone(),
            config.media.api_base.clone(),
            config.media.cloud_name.clone(),
            config.media.upload_preset.clone(),
        )
        .max_bytes(config.media.max_bytes),
    );

    let sessions = Arc::new(SessionStore::new());
    spawn_session_sweeper(Arc::clone(&sessions), config.session_idle_timeout);

    let engine = Arc::new(ConversationEngine::new(
        sessions,
        messenger,
        ledger,
        media,
        Arc::new(SystemClock::with_offset_minutes(config.utc_offset_minutes)),
        EngineSettings {
            language: config.language.clone(),
            call_timeout: config.call_timeout,
        },
    ));

    let app = router(Arc::new(WebhookState {
        verify_token: config.verify_token.clone(),
        engine,
    }));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Webhook server listening");

    axum::serve(listener, app).await.context("Webhook server stopped")?;
    Ok(())
}
