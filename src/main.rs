use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use bindbot::app::Services;
use bindbot::commands::CommandDispatcher;
use bindbot::config::{self, AccountApiSettings, BotConfig};
use bindbot::events::EventSecret;
use bindbot::gateway::{ChatGateway, OneBotClient};
use bindbot::reconciliation::start_reconciliation_worker;
use bindbot::routes::api_routes;
use bindbot::store::{BindingStore, HeistLogStore, MemoryStore, PgStore};
use bindbot::website::{AccountClient, NewApiClient};

async fn root() -> &'static str {
    "Quota binding bot"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();

    let bot_config = BotConfig::load(config::BOT_CONFIG_PATH.as_str())?;
    let bot_config = Arc::new(bot_config);

    let (binding_store, heist_store): (Arc<dyn BindingStore>, Arc<dyn HeistLogStore>) =
        match config::STORAGE_BACKEND.as_str() {
            "memory" => {
                tracing::warn!("using in-memory storage; bindings are lost on restart");
                let store = Arc::new(MemoryStore::new());
                let bindings: Arc<dyn BindingStore> = store.clone();
                let heists: Arc<dyn HeistLogStore> = store;
                (bindings, heists)
            }
            _ => {
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(config::DATABASE_URL.as_str())
                    .await?;

                if let Err(error) = sqlx::migrate!().run(&pool).await {
                    if *config::ALLOW_MIGRATION_FAILURE {
                        tracing::warn!(
                            ?error,
                            "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
                        );
                    } else {
                        return Err(Box::new(error) as Box<dyn std::error::Error>);
                    }
                }
                let store = Arc::new(PgStore::new(pool));
                let bindings: Arc<dyn BindingStore> = store.clone();
                let heists: Arc<dyn HeistLogStore> = store;
                (bindings, heists)
            }
        };

    let accounts: Arc<dyn AccountClient> =
        Arc::new(NewApiClient::new(AccountApiSettings::from_env()?)?);
    let gateway: Arc<dyn ChatGateway> = Arc::new(OneBotClient::new(
        config::ONEBOT_API_URL.as_str(),
        config::ONEBOT_ACCESS_TOKEN.clone(),
    )?);

    let services = Arc::new(Services::build(
        bot_config.clone(),
        binding_store,
        heist_store,
        accounts,
        gateway,
    ));
    let reconciliation = start_reconciliation_worker(services.reconciliation.clone());
    let dispatcher = Arc::new(CommandDispatcher::new(services));
    if config::EVENT_SIGNING_SECRET.is_none() {
        tracing::warn!("EVENT_SIGNING_SECRET unset; inbound events are not authenticated");
    }

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(dispatcher))
        .layer(Extension(reconciliation))
        .layer(Extension(EventSecret(config::EVENT_SIGNING_SECRET.clone())));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, monitored_groups = ?bot_config.group_leave.monitored_groups, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
