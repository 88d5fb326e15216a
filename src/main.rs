use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use safetrain_progress::{
    config::Config,
    db,
    notify::{NoopNotifier, Notifier, WebhookNotifier},
    quiz::{HttpQuizGenerator, QuizGenerator, UnconfiguredGenerator},
    routes::{self, AppState},
    store::{DocumentStore, MemoryStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&cfg.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Arc<dyn DocumentStore> = match &cfg.database_url {
        Some(url) => {
            let pool = db::connect(url).await?;
            // crate-relative path for sqlx migrations
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(db::PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &cfg.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), cfg.http_timeout)?),
        None => Arc::new(NoopNotifier),
    };
    let generator: Arc<dyn QuizGenerator> = match &cfg.quiz_generator_url {
        Some(url) => Arc::new(HttpQuizGenerator::new(url.clone(), cfg.http_timeout)?),
        None => Arc::new(UnconfiguredGenerator),
    };

    let app = routes::router(AppState {
        store,
        notifier,
        generator,
    })
    .layer(DefaultBodyLimit::max(cfg.body_limit))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
