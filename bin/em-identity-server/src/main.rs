//! Emporium Identity Server
//!
//! Runs the account-created and email-confirmed consumers and exposes
//! health and Prometheus endpoints. In dev mode every collaborator is local:
//! in-memory stores, an embedded SQLite queue and logged email.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use em_config::{AppConfig, ConfigLoader};
use em_identity::account::{InMemoryAccountRepository, PostgresAccountRepository};
use em_identity::confirmation::{InMemoryConfirmationTokenStore, PostgresConfirmationTokenStore};
use em_identity::consumer::{run_supervised, AccountCreatedHandler, EmailConfirmedHandler};
use em_identity::email::{LogEmailTransport, SmtpEmailTransport, SmtpSettings};
use em_identity::refresh_token::{InMemoryRefreshTokenStore, PostgresRefreshTokenStore};
use em_identity::{
    AccountRepository, Argon2Config, AuthService, AuthServiceDeps, BatchConsumer, BatchHandler,
    Clock, ConfirmationLink, ConfirmationTokenStore, ConsumerSettings, EmailConfirmationService,
    EmailTransport, KeyPair, NotificationPublisher, PasswordHasher, PasswordPolicy,
    QueueNotificationPublisher, RefreshTokenStore, SystemClock, TokenCodec,
};
use em_queue::sqlite::SqliteQueue;
use em_queue::sqs::SqsQueue;
use em_queue::{EmbeddedQueue, QueueReceiver, QueueSender};

const CONSUMER_COUNT: usize = 2;

#[derive(Parser, Debug)]
#[command(name = "em-identity-server")]
#[command(about = "Emporium identity server - account pipeline consumers")]
struct Args {
    /// Path to a TOML config file (otherwise searched in the default locations)
    #[arg(long, env = "EMPORIUM_CONFIG")]
    config: Option<String>,

    /// Print an example configuration and exit
    #[arg(long)]
    print_example_config: bool,
}

/// One queue used for both publishing and consuming
struct PipelineQueue {
    receiver: Arc<dyn QueueReceiver>,
    sender: Arc<dyn QueueSender>,
}

impl PipelineQueue {
    fn new<Q: QueueReceiver + QueueSender + 'static>(queue: Arc<Q>) -> Self {
        Self {
            receiver: queue.clone(),
            sender: queue,
        }
    }
}

struct Stores {
    accounts: Arc<dyn AccountRepository>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    confirmations: Arc<dyn ConfirmationTokenStore>,
}

#[derive(Clone)]
struct AppState {
    running_consumers: Arc<AtomicUsize>,
    metrics: PrometheusHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    if args.print_example_config {
        println!("{}", AppConfig::example_toml());
        return Ok(());
    }

    em_common::logging::init_logging("em-identity-server");
    info!("Starting Emporium Identity Server");

    let config = match &args.config {
        Some(path) => ConfigLoader::with_path(path).load()?,
        None => ConfigLoader::new().load()?,
    };
    config.validate()?;
    info!(
        dev_mode = config.dev_mode,
        queue_type = %config.queue.queue_type,
        email_transport = %config.email.transport,
        "Configuration loaded"
    );

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    // 1. Keys and credentials
    let keys = KeyPair::load_or_generate(
        non_empty(&config.auth.jwt.private_key_path),
        non_empty(&config.auth.jwt.public_key_path),
    )?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let codec = Arc::new(TokenCodec::new(
        &keys,
        chrono::Duration::seconds(config.auth.jwt.access_token_expiry_secs as i64),
        clock.clone(),
    )?);
    info!(kid = %codec.key_id(), "Token signing key ready");

    let hasher = Arc::new(PasswordHasher::new(
        config.auth.password.pepper.clone(),
        PasswordPolicy {
            min_length: config.auth.password.min_length,
            max_length: config.auth.password.max_length,
        },
        Argon2Config::default(),
    )?);
    if config.auth.password.pepper.is_empty() {
        warn!("No password pepper configured");
    }

    // 2. Stores
    let stores = if config.dev_mode {
        info!("Dev mode: using in-memory stores");
        Stores {
            accounts: Arc::new(InMemoryAccountRepository::new(hasher.clone(), clock.clone())),
            refresh_tokens: Arc::new(InMemoryRefreshTokenStore::new(config.auth.max_refresh_tokens)),
            confirmations: Arc::new(InMemoryConfirmationTokenStore::new(clock.clone())),
        }
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        em_identity::schema::init_schema(&pool).await?;
        info!("Connected to PostgreSQL");

        Stores {
            accounts: Arc::new(PostgresAccountRepository::new(pool.clone(), hasher.clone())),
            refresh_tokens: Arc::new(PostgresRefreshTokenStore::with_limit(
                pool.clone(),
                config.auth.max_refresh_tokens,
            )),
            confirmations: Arc::new(PostgresConfirmationTokenStore::new(pool, clock.clone())),
        }
    };

    // 3. Queues
    let (created_queue, confirmed_queue) = if config.dev_mode || config.queue.is_embedded() {
        create_embedded_queues(&config).await?
    } else {
        create_sqs_queues(&config).await
    };
    let publisher: Arc<dyn NotificationPublisher> = Arc::new(QueueNotificationPublisher::new(
        created_queue.sender.clone(),
        confirmed_queue.sender.clone(),
    ));

    // 4. Services
    let transport = create_email_transport(&config)?;
    let auth = Arc::new(AuthService::new(
        AuthServiceDeps {
            accounts: stores.accounts,
            refresh_tokens: stores.refresh_tokens,
            codec,
            hasher,
            publisher: publisher.clone(),
            clock: clock.clone(),
        },
        chrono::Duration::seconds(config.auth.jwt.refresh_token_expiry_secs as i64),
    ));
    let confirmations = Arc::new(EmailConfirmationService::new(
        stores.confirmations,
        transport,
        publisher,
        confirmation_link(&config),
        clock,
    ));

    // 5. Consumers
    let cancel = CancellationToken::new();
    let running_consumers = Arc::new(AtomicUsize::new(0));
    let settings = ConsumerSettings {
        max_messages: config.consumer.max_messages,
        wait_seconds: config.consumer.wait_time_seconds,
    };
    let restart_delay = Duration::from_secs(config.consumer.restart_delay_seconds);

    let consumer_tasks = vec![
        spawn_consumer(
            BatchConsumer::new(
                created_queue.receiver,
                AccountCreatedHandler::new(confirmations),
                settings,
            ),
            cancel.clone(),
            restart_delay,
            running_consumers.clone(),
        ),
        spawn_consumer(
            BatchConsumer::new(
                confirmed_queue.receiver,
                EmailConfirmedHandler::new(auth),
                settings,
            ),
            cancel.clone(),
            restart_delay,
            running_consumers.clone(),
        ),
    ];

    // 6. Health and metrics
    let state = AppState {
        running_consumers,
        metrics,
    };
    let app = Router::new()
        .route("/q/health", get(health))
        .route("/q/health/live", get(|| async { Json(serde_json::json!({"status": "UP"})) }))
        .route("/q/health/ready", get(health))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
        .parse()
        .context("Invalid HTTP bind address")?;
    let listener = TcpListener::bind(addr).await?;
    info!(?addr, "HTTP server listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    for task in consumer_tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Consumer task ended abnormally");
        }
    }

    info!("Emporium Identity Server shutdown complete");
    Ok(())
}

fn spawn_consumer<H: BatchHandler + 'static>(
    consumer: BatchConsumer<H>,
    cancel: CancellationToken,
    restart_delay: Duration,
    running: Arc<AtomicUsize>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        running.fetch_add(1, Ordering::SeqCst);
        run_supervised(consumer, cancel, restart_delay).await;
        running.fetch_sub(1, Ordering::SeqCst);
    })
}

async fn create_embedded_queues(config: &AppConfig) -> Result<(PipelineQueue, PipelineQueue)> {
    let embedded = &config.queue.embedded;
    ensure_sqlite_dir(&embedded.database_url)?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&embedded.database_url)
        .await
        .context("Failed to open embedded queue database")?;
    info!(url = %embedded.database_url, "Using embedded SQLite queue");

    let created = Arc::new(SqliteQueue::new(
        pool.clone(),
        embedded.account_created_queue.clone(),
        embedded.visibility_timeout,
    ));
    let confirmed = Arc::new(SqliteQueue::new(
        pool,
        embedded.email_confirmed_queue.clone(),
        embedded.visibility_timeout,
    ));
    created.init_schema().await?;
    confirmed.init_schema().await?;

    Ok((PipelineQueue::new(created), PipelineQueue::new(confirmed)))
}

async fn create_sqs_queues(config: &AppConfig) -> (PipelineQueue, PipelineQueue) {
    let sqs = &config.queue.sqs;
    let region = aws_config::Region::new(sqs.region.clone());

    let aws = if sqs.endpoint_url.is_empty() {
        aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region)
            .load()
            .await
    } else {
        info!(endpoint = %sqs.endpoint_url, "Configuring SQS client for LocalStack");
        aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region)
            .endpoint_url(&sqs.endpoint_url)
            .load()
            .await
    };
    let client = aws_sdk_sqs::Client::new(&aws);
    let visibility = sqs.visibility_timeout as i32;

    let created = Arc::new(SqsQueue::from_queue_url(
        client.clone(),
        sqs.account_created_queue_url.clone(),
        visibility,
    ));
    let confirmed = Arc::new(SqsQueue::from_queue_url(
        client,
        sqs.email_confirmed_queue_url.clone(),
        visibility,
    ));
    info!(
        account_created = %sqs.account_created_queue_url,
        email_confirmed = %sqs.email_confirmed_queue_url,
        "Using SQS queues"
    );

    (PipelineQueue::new(created), PipelineQueue::new(confirmed))
}

fn create_email_transport(config: &AppConfig) -> Result<Arc<dyn EmailTransport>> {
    if config.dev_mode || config.email.transport != "smtp" {
        info!("Email delivery is logged, not sent");
        return Ok(Arc::new(LogEmailTransport));
    }

    let smtp = &config.email.smtp;
    let transport = SmtpEmailTransport::new(&SmtpSettings {
        host: smtp.host.clone(),
        port: smtp.port,
        username: smtp.username.clone(),
        password: smtp.password.clone(),
        from: config.email.from.clone(),
    })?;
    info!(host = %smtp.host, port = smtp.port, "Using SMTP email transport");
    Ok(Arc::new(transport))
}

fn confirmation_link(config: &AppConfig) -> ConfirmationLink {
    let link = &config.email.confirmation;
    if link.mode == "request" {
        ConfirmationLink::FromRequest {
            scheme: link.scheme.clone(),
            path: link.path.clone(),
            fallback_host: link.fallback_host.clone(),
        }
    } else {
        ConfirmationLink::Static {
            base_url: link.base_url.clone(),
        }
    }
}

/// Create the parent directory of a file-backed SQLite URL
fn ensure_sqlite_dir(database_url: &str) -> Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let running = state.running_consumers.load(Ordering::SeqCst);
    let up = running == CONSUMER_COUNT;
    let status = if up { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(serde_json::json!({
            "status": if up { "UP" } else { "DOWN" },
            "consumers_running": running,
        })),
    )
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
