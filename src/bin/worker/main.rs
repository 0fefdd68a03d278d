use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ingest_outbox_server::{
    adapters::outbound::storage::S3Config,
    app::{AppBuilder, AppConfig, BrokerBackend, RepositoryBackend, StorageBackend},
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ingest-worker")]
#[command(about = "Upload session expiry, outbox delivery and external download worker", long_about = None)]
struct Cli {
    /// Storage backend type
    #[arg(long, env = "STORAGE_BACKEND", default_value = "memory")]
    storage_backend: String,

    /// Buckets the storage adapter serves, comma separated
    #[arg(long, env = "STORAGE_BUCKETS", value_delimiter = ',', default_value = "uploads,downloads")]
    buckets: Vec<String>,

    /// Repository backend type
    #[arg(long, env = "REPOSITORY_BACKEND", default_value = "memory")]
    repository_backend: String,

    /// Broker backend type
    #[arg(long, env = "BROKER_BACKEND", default_value = "memory")]
    broker_backend: String,

    /// Broker ingest endpoint (http broker backend)
    #[arg(long, env = "BROKER_ENDPOINT")]
    broker_endpoint: Option<String>,

    /// S3 endpoint URL (for S3-compatible stores)
    #[arg(long, env = "S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// S3 region
    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    s3_region: String,

    /// S3 access key
    #[arg(long, env = "S3_ACCESS_KEY")]
    s3_access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "S3_SECRET_KEY")]
    s3_secret_key: Option<String>,

    /// Allow plain HTTP to the S3 endpoint
    #[arg(long, env = "S3_ALLOW_HTTP", default_value = "false")]
    s3_allow_http: bool,

    /// Database URL for repository backend (PostgreSQL)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value = "10")]
    database_max_connections: u32,

    /// Seconds between session expiry sweeps
    #[arg(long, env = "SESSION_EXPIRY_INTERVAL_SECS", default_value = "60")]
    expiry_interval_secs: u64,

    /// Seconds between outbox sweeps
    #[arg(long, env = "OUTBOX_SWEEP_INTERVAL_SECS", default_value = "15")]
    outbox_interval_secs: u64,

    /// Retry budget for broker-routed outbox rows
    #[arg(long, env = "OUTBOX_MAX_RETRIES", default_value = "5")]
    outbox_max_retries: u32,

    /// Retry budget for webhook and callback rows
    #[arg(long, env = "WEBHOOK_MAX_RETRIES", default_value = "8")]
    webhook_max_retries: u32,

    #[arg(long, env = "OUTBOX_BASE_DELAY_SECS", default_value = "30")]
    outbox_base_delay_secs: u64,

    #[arg(long, env = "OUTBOX_MAX_DELAY_SECS", default_value = "3600")]
    outbox_max_delay_secs: u64,

    /// Seconds a download claim may be held before it is released as a failed attempt
    #[arg(long, env = "DOWNLOAD_CLAIM_TIMEOUT_SECS", default_value = "600")]
    download_claim_timeout_secs: u64,

    /// Seconds between download recovery sweeps
    #[arg(long, env = "DOWNLOAD_RECOVERY_INTERVAL_SECS", default_value = "60")]
    recovery_interval_secs: u64,

    /// Retry budget for downloads that do not carry one
    #[arg(long, env = "DOWNLOAD_MAX_RETRIES", default_value = "3")]
    download_max_retries: u32,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the sweeps and the download consumer until Ctrl-C (default)
    Run,

    /// Run one pass of every sweep, then exit
    SweepOnce,

    /// List outbox rows that ran out of retries
    Exhausted {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

impl Cli {
    fn to_app_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::default();

        config.storage_backend = match self.storage_backend.as_str() {
            "memory" => StorageBackend::InMemory {
                buckets: self.buckets.clone(),
            },
            "s3" => StorageBackend::S3 {
                config: S3Config {
                    region: self.s3_region.clone(),
                    access_key: self.s3_access_key.clone(),
                    secret_key: self.s3_secret_key.clone(),
                    endpoint: self.s3_endpoint.clone(),
                    allow_http: self.s3_allow_http,
                },
                buckets: self.buckets.clone(),
            },
            _ => anyhow::bail!("Unknown storage backend: {}", self.storage_backend),
        };

        config.repository_backend = match self.repository_backend.as_str() {
            "memory" => RepositoryBackend::InMemory,
            "database" | "db" => {
                let connection_string = self
                    .database_url
                    .clone()
                    .context("DATABASE_URL is required for database backend")?;
                RepositoryBackend::Database {
                    connection_string,
                    max_connections: self.database_max_connections,
                }
            }
            _ => anyhow::bail!("Unknown repository backend: {}", self.repository_backend),
        };

        config.broker_backend = match self.broker_backend.as_str() {
            "memory" => BrokerBackend::InMemory,
            "http" => BrokerBackend::Http {
                endpoint: self
                    .broker_endpoint
                    .clone()
                    .context("BROKER_ENDPOINT is required for http broker backend")?,
            },
            _ => anyhow::bail!("Unknown broker backend: {}", self.broker_backend),
        };

        config.sessions.expiry_interval = Duration::from_secs(self.expiry_interval_secs);
        config.outbox.sweep_interval = Duration::from_secs(self.outbox_interval_secs);
        config.outbox.retry.max_retries = self.outbox_max_retries;
        config.outbox.retry.webhook_max_retries = self.webhook_max_retries;
        config.outbox.retry.base_delay = Duration::from_secs(self.outbox_base_delay_secs);
        config.outbox.retry.max_delay = Duration::from_secs(self.outbox_max_delay_secs);
        config.downloads.default_max_retries = self.download_max_retries;
        config.downloads.claim_timeout = Duration::from_secs(self.download_claim_timeout_secs);
        config.downloads.recovery_interval = Duration::from_secs(self.recovery_interval_secs);

        config.validate()?;
        Ok(config)
    }

    fn init_logging(&self) -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.log_level.to_lowercase()))
            .context("Invalid log level")?;

        let registry = tracing_subscriber::registry().with(env_filter);
        if self.log_json {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    cli.init_logging()?;

    info!(
        storage_backend = %cli.storage_backend,
        repository_backend = %cli.repository_backend,
        broker_backend = %cli.broker_backend,
        "Starting ingest worker"
    );

    let config = cli.to_app_config()?;
    let mut app = AppBuilder::new()
        .with_config(config)
        .build()
        .await
        .context("Failed to build application")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let consumer = app.local_messages.take().map(|feed| {
                let worker = app.worker.clone();
                tokio::spawn(async move { worker.consume(feed).await })
            });

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Could not listen for Ctrl-C");
                }
            };
            app.scheduler().run_until(shutdown).await;

            if let Some(consumer) = consumer {
                consumer.abort();
            }
            info!("Ingest worker stopped");
        }
        Commands::SweepOnce => {
            let expiry = app
                .expiry_sweeper
                .sweep()
                .await
                .context("Session expiry sweep failed")?;
            let outbox = app
                .outbox_sweeper
                .sweep()
                .await
                .context("Outbox sweep failed")?;
            let recovery = app
                .recovery_sweeper
                .sweep()
                .await
                .context("Download recovery sweep failed")?;
            info!(
                examined = expiry.examined,
                expired = expiry.expired.len(),
                skipped = expiry.skipped.len(),
                failed = expiry.failed.len(),
                "Session expiry sweep finished"
            );
            info!(
                attempted = outbox.attempted,
                published = outbox.published,
                failed = outbox.failed,
                errors = outbox.errors,
                exhausted = outbox.exhausted.len(),
                "Outbox sweep finished"
            );
            info!(
                released_claims = recovery.released_claims,
                finished = recovery.finished.len(),
                restarted = recovery.restarted.len(),
                errors = recovery.errors,
                "Download recovery finished"
            );
        }
        Commands::Exhausted { limit } => {
            let rows = app
                .outbox_sweeper
                .exhausted(limit)
                .await
                .context("Could not list exhausted outbox rows")?;
            for row in rows {
                println!(
                    "{}\t{}\t{}\tretries={}\t{}",
                    row.id(),
                    row.kind(),
                    row.idempotency_key(),
                    row.retry_count(),
                    row.last_error().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "ingest-worker",
            "--storage-backend",
            "s3",
            "--buckets",
            "uploads,media",
            "--s3-access-key",
            "test-key",
            "sweep-once",
        ]);

        assert_eq!(cli.storage_backend, "s3");
        assert_eq!(cli.buckets, vec!["uploads", "media"]);
        assert!(matches!(cli.command, Some(Commands::SweepOnce)));

        let config = cli.to_app_config().unwrap();
        assert!(matches!(config.storage_backend, StorageBackend::S3 { .. }));
    }

    #[test]
    fn test_database_backend_needs_url() {
        let cli = Cli::parse_from(["ingest-worker", "--repository-backend", "database"]);
        if std::env::var("DATABASE_URL").is_err() {
            assert!(cli.to_app_config().is_err());
        }
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let cli = Cli::parse_from(["ingest-worker", "--outbox-interval-secs", "0"]);
        let err = cli.to_app_config().unwrap_err();
        assert!(err.to_string().contains("outbox sweep interval"));
    }
}
