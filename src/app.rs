use sqlx::postgres::PgPoolOptions;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{
    adapters::outbound::{
        fetch::HttpRemoteFetcher,
        messaging::{HttpMessageBroker, HttpWebhookSender, InMemoryMessageBroker},
        persistence::{InMemoryStore, SqlStore},
        storage::{ObjectStoreStorageAdapter, S3Config},
    },
    ports::{
        fetcher::RemoteFetcher,
        messaging::{BrokerMessage, MessageBroker, WebhookSender},
        repositories::{
            DownloadTaskRepository, ExternalDownloadRepository, OutboxRepository,
            UploadSessionRepository,
        },
        services::ExternalDownloadService,
        storage::ObjectStorageClient,
        system::{Clock, IdGenerator, RandomIdGenerator, SystemClock},
    },
    services::{
        DownloadLifecycleListener, DownloadRecoverySweeper, DownloadSettings, DownloadTaskWorker,
        EventDispatcher, ExpireStrategyRegistry, ExternalDownloadServiceImpl, OutboxMessageManager,
        OutboxPublishingListener, OutboxSettings, OutboxSweeper, Scheduler, SessionExpirySweeper,
        SessionSettings, SweepIntervals, UploadSessionServiceImpl,
    },
};

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_backend: StorageBackend,
    pub repository_backend: RepositoryBackend,
    pub broker_backend: BrokerBackend,
    pub sessions: SessionSettings,
    pub outbox: OutboxSettings,
    pub downloads: DownloadSettings,
    /// Timeout for broker and webhook HTTP calls
    pub http_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        let downloads = DownloadSettings::default();
        Self {
            storage_backend: StorageBackend::InMemory {
                buckets: vec!["uploads".to_string(), downloads.default_bucket.clone()],
            },
            repository_backend: RepositoryBackend::InMemory,
            broker_backend: BrokerBackend::InMemory,
            sessions: SessionSettings::default(),
            outbox: OutboxSettings::default(),
            downloads,
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory { buckets: Vec<String> },
    S3 { config: S3Config, buckets: Vec<String> },
}

/// Repository backend configuration
#[derive(Debug, Clone)]
pub enum RepositoryBackend {
    InMemory,
    Database {
        connection_string: String,
        max_connections: u32,
    },
}

/// Broker backend configuration
#[derive(Debug, Clone)]
pub enum BrokerBackend {
    /// In-process broker; the app's download worker consumes it directly
    InMemory,
    Http { endpoint: String },
}

/// Repository handles, all backed by the same store
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn UploadSessionRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub downloads: Arc<dyn ExternalDownloadRepository>,
    pub tasks: Arc<dyn DownloadTaskRepository>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UploadSessionRepository
            + OutboxRepository
            + ExternalDownloadRepository
            + DownloadTaskRepository,
    {
        Self {
            sessions: store.clone(),
            outbox: store.clone(),
            downloads: store.clone(),
            tasks: store,
        }
    }
}

/// Application services container
pub struct AppServices {
    pub uploads: Arc<UploadSessionServiceImpl>,
    pub downloads: Arc<ExternalDownloadServiceImpl>,
    pub worker: Arc<DownloadTaskWorker>,
    pub expiry_sweeper: Arc<SessionExpirySweeper>,
    pub outbox_sweeper: Arc<OutboxSweeper>,
    pub recovery_sweeper: Arc<DownloadRecoverySweeper>,
    pub dispatcher: Arc<EventDispatcher>,
    pub repositories: Repositories,
    pub storage: Arc<dyn ObjectStorageClient>,
    /// Feed for the download worker when the broker is in-process
    pub local_messages: Option<mpsc::UnboundedReceiver<BrokerMessage>>,
    pub config: AppConfig,
}

impl AppServices {
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.expiry_sweeper.clone(),
            self.outbox_sweeper.clone(),
            self.recovery_sweeper.clone(),
            self.config.intervals(),
        )
    }
}

/// Application builder for dependency injection.
///
/// Every collaborator can be replaced before `build`; anything not
/// replaced is created from the configuration.
pub struct AppBuilder {
    config: AppConfig,
    storage: Option<Arc<dyn ObjectStorageClient>>,
    repositories: Option<Repositories>,
    broker: Option<Arc<dyn MessageBroker>>,
    webhooks: Option<Arc<dyn WebhookSender>>,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl AppBuilder {
    /// Create a new application builder
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            storage: None,
            repositories: None,
            broker: None,
            webhooks: None,
            fetcher: None,
            clock: None,
            ids: None,
        }
    }

    /// Configure the application with custom settings
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_storage_backend(mut self, backend: StorageBackend) -> Self {
        self.config.storage_backend = backend;
        self
    }

    pub fn with_repository_backend(mut self, backend: RepositoryBackend) -> Self {
        self.config.repository_backend = backend;
        self
    }

    pub fn with_broker_backend(mut self, backend: BrokerBackend) -> Self {
        self.config.broker_backend = backend;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorageClient>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = Some(repositories);
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_webhooks(mut self, webhooks: Arc<dyn WebhookSender>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Build the complete application with services
    pub async fn build(mut self) -> Result<AppServices, AppError> {
        self.config.validate()?;
        let storage = match self.storage.take() {
            Some(storage) => storage,
            None => self.create_storage()?,
        };
        let repositories = match self.repositories.take() {
            Some(repositories) => repositories,
            None => self.create_repositories().await?,
        };
        let (broker, local_messages) = match self.broker.take() {
            Some(broker) => (broker, None),
            None => self.create_broker()?,
        };
        let webhooks: Arc<dyn WebhookSender> = match self.webhooks.take() {
            Some(webhooks) => webhooks,
            None => Arc::new(HttpWebhookSender::new(self.config.http_timeout).map_err(|e| {
                AppError::ServiceInit {
                    message: e.to_string(),
                }
            })?),
        };
        let fetcher: Arc<dyn RemoteFetcher> = match self.fetcher.take() {
            Some(fetcher) => fetcher,
            None => Arc::new(
                HttpRemoteFetcher::new(self.config.downloads.fetch_timeout).map_err(|e| {
                    AppError::ServiceInit {
                        message: e.to_string(),
                    }
                })?,
            ),
        };
        let clock = self.clock.take().unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self.ids.take().unwrap_or_else(|| Arc::new(RandomIdGenerator));
        let config = self.config;

        let dispatcher = Arc::new(EventDispatcher::new());
        let manager = Arc::new(OutboxMessageManager::new(broker, webhooks));

        let uploads = Arc::new(UploadSessionServiceImpl::new(
            repositories.sessions.clone(),
            storage.clone(),
            dispatcher.clone(),
            clock.clone(),
            ids.clone(),
            config.sessions.clone(),
        ));

        let downloads = Arc::new(ExternalDownloadServiceImpl::new(
            repositories.downloads.clone(),
            repositories.outbox.clone(),
            dispatcher.clone(),
            clock.clone(),
            ids.clone(),
            config.downloads.clone(),
        ));

        let worker = Arc::new(DownloadTaskWorker::new(
            repositories.downloads.clone(),
            repositories.tasks.clone(),
            fetcher,
            storage.clone(),
            dispatcher.clone(),
            clock.clone(),
            ids,
            config.downloads.fetch_timeout,
            config.downloads.claim_timeout,
        ));

        let recovery_sweeper = Arc::new(DownloadRecoverySweeper::new(
            worker.clone(),
            repositories.downloads.clone(),
            repositories.tasks.clone(),
            downloads.clone() as Arc<dyn ExternalDownloadService>,
            clock.clone(),
            config.downloads.claim_timeout,
            config.downloads.recovery_batch_size,
        ));

        let registry = Arc::new(ExpireStrategyRegistry::standard(
            repositories.sessions.clone(),
            storage.clone(),
        ));
        let expiry_sweeper = Arc::new(SessionExpirySweeper::new(
            repositories.sessions.clone(),
            registry,
            dispatcher.clone(),
            clock.clone(),
            config.sessions.expiry_batch_size,
        ));

        let outbox_sweeper = Arc::new(OutboxSweeper::new(
            repositories.outbox.clone(),
            manager.clone(),
            clock.clone(),
            config.outbox.retry.clone(),
            config.outbox.batch_size,
        ));

        // Publish first, so a download's callback row is attempted before
        // the download itself moves on
        dispatcher.register(Arc::new(OutboxPublishingListener::new(
            repositories.outbox.clone(),
            manager,
            clock,
        )));
        dispatcher.register(Arc::new(DownloadLifecycleListener::new(
            downloads.clone() as Arc<dyn ExternalDownloadService>,
        )));

        Ok(AppServices {
            uploads,
            downloads,
            worker,
            expiry_sweeper,
            outbox_sweeper,
            recovery_sweeper,
            dispatcher,
            repositories,
            storage,
            local_messages,
            config,
        })
    }

    fn create_storage(&self) -> Result<Arc<dyn ObjectStorageClient>, AppError> {
        match &self.config.storage_backend {
            StorageBackend::InMemory { buckets } => {
                let names: Vec<&str> = buckets.iter().map(String::as_str).collect();
                Ok(Arc::new(ObjectStoreStorageAdapter::in_memory(&names)))
            }
            StorageBackend::S3 { config, buckets } => {
                let adapter = ObjectStoreStorageAdapter::s3(config, buckets).map_err(|e| {
                    AppError::StorageInit {
                        message: e.to_string(),
                    }
                })?;
                Ok(Arc::new(adapter))
            }
        }
    }

    async fn create_repositories(&self) -> Result<Repositories, AppError> {
        match &self.config.repository_backend {
            RepositoryBackend::InMemory => Ok(Repositories::from_store(Arc::new(InMemoryStore::new()))),
            RepositoryBackend::Database {
                connection_string,
                max_connections,
            } => {
                let pool = PgPoolOptions::new()
                    .max_connections(*max_connections)
                    .connect(connection_string)
                    .await
                    .map_err(|e| AppError::RepositoryInit {
                        message: format!("Failed to connect to database: {}", e),
                    })?;

                let store = SqlStore::new(pool);
                store.migrate().await.map_err(|e| AppError::RepositoryInit {
                    message: format!("Failed to run migrations: {}", e),
                })?;
                Ok(Repositories::from_store(Arc::new(store)))
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn create_broker(
        &self,
    ) -> Result<(Arc<dyn MessageBroker>, Option<mpsc::UnboundedReceiver<BrokerMessage>>), AppError> {
        match &self.config.broker_backend {
            BrokerBackend::InMemory => {
                let broker = InMemoryMessageBroker::new();
                let feed = broker.subscribe();
                Ok((Arc::new(broker), Some(feed)))
            }
            BrokerBackend::Http { endpoint } => {
                let broker = HttpMessageBroker::new(endpoint.clone(), self.config.http_timeout)
                    .map_err(|e| AppError::ServiceInit {
                        message: e.to_string(),
                    })?;
                Ok((Arc::new(broker), None))
            }
        }
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage initialization error: {message}")]
    StorageInit { message: String },

    #[error("Repository initialization error: {message}")]
    RepositoryInit { message: String },

    #[error("Service initialization error: {message}")]
    ServiceInit { message: String },
}

/// Create an in-memory application for testing and development
pub async fn create_in_memory_app() -> Result<AppServices, AppError> {
    AppBuilder::new().build().await
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| AppError::Configuration {
            message: format!("{} has an invalid value: {}", name, value),
        }),
        Err(_) => Ok(default),
    }
}

fn env_required(name: &str) -> Result<String, AppError> {
    std::env::var(name).map_err(|_| AppError::Configuration {
        message: format!("{} environment variable required", name),
    })
}

impl AppConfig {
    /// Read configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = AppConfig::default();

        let mut downloads = defaults.downloads;
        downloads.default_max_retries =
            env_or("DOWNLOAD_MAX_RETRIES", downloads.default_max_retries)?;
        downloads.fetch_timeout = Duration::from_secs(env_or(
            "DOWNLOAD_FETCH_TIMEOUT_SECS",
            downloads.fetch_timeout.as_secs(),
        )?);
        downloads.default_bucket = env_or("DOWNLOAD_BUCKET", downloads.default_bucket)?;

        let buckets: Vec<String> = match std::env::var("STORAGE_BUCKETS") {
            Ok(list) => list
                .split(',')
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect(),
            Err(_) => vec!["uploads".to_string(), downloads.default_bucket.clone()],
        };

        let storage_backend = match std::env::var("STORAGE_BACKEND").as_deref() {
            Ok("s3") => StorageBackend::S3 {
                config: S3Config {
                    region: env_required("S3_REGION")?,
                    access_key: std::env::var("S3_ACCESS_KEY").ok(),
                    secret_key: std::env::var("S3_SECRET_KEY").ok(),
                    endpoint: std::env::var("S3_ENDPOINT").ok(),
                    allow_http: env_or("S3_ALLOW_HTTP", false)?,
                },
                buckets,
            },
            _ => StorageBackend::InMemory { buckets },
        };

        let repository_backend = match std::env::var("REPOSITORY_BACKEND").as_deref() {
            Ok("database") => RepositoryBackend::Database {
                connection_string: env_required("DATABASE_URL")?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            _ => RepositoryBackend::InMemory,
        };

        let broker_backend = match std::env::var("BROKER_BACKEND").as_deref() {
            Ok("http") => BrokerBackend::Http {
                endpoint: env_required("BROKER_ENDPOINT")?,
            },
            _ => BrokerBackend::InMemory,
        };

        let mut sessions = defaults.sessions;
        sessions.default_ttl = Duration::from_secs(env_or(
            "SESSION_DEFAULT_TTL_SECS",
            sessions.default_ttl.as_secs(),
        )?);
        sessions.expiry_interval = Duration::from_secs(env_or(
            "SESSION_EXPIRY_INTERVAL_SECS",
            sessions.expiry_interval.as_secs(),
        )?);

        downloads.claim_timeout = Duration::from_secs(env_or(
            "DOWNLOAD_CLAIM_TIMEOUT_SECS",
            downloads.claim_timeout.as_secs(),
        )?);
        downloads.recovery_interval = Duration::from_secs(env_or(
            "DOWNLOAD_RECOVERY_INTERVAL_SECS",
            downloads.recovery_interval.as_secs(),
        )?);

        let mut outbox = defaults.outbox;
        outbox.retry.base_delay = Duration::from_secs(env_or(
            "OUTBOX_BASE_DELAY_SECS",
            outbox.retry.base_delay.as_secs(),
        )?);
        outbox.retry.max_delay = Duration::from_secs(env_or(
            "OUTBOX_MAX_DELAY_SECS",
            outbox.retry.max_delay.as_secs(),
        )?);
        outbox.retry.max_retries = env_or("OUTBOX_MAX_RETRIES", outbox.retry.max_retries)?;
        outbox.retry.webhook_max_retries =
            env_or("WEBHOOK_MAX_RETRIES", outbox.retry.webhook_max_retries)?;
        outbox.sweep_interval = Duration::from_secs(env_or(
            "OUTBOX_SWEEP_INTERVAL_SECS",
            outbox.sweep_interval.as_secs(),
        )?);

        let config = Self {
            storage_backend,
            repository_backend,
            broker_backend,
            sessions,
            outbox,
            downloads,
            http_timeout: Duration::from_secs(env_or(
                "HTTP_TIMEOUT_SECS",
                defaults.http_timeout.as_secs(),
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn intervals(&self) -> SweepIntervals {
        SweepIntervals {
            expiry: self.sessions.expiry_interval,
            outbox: self.outbox.sweep_interval,
            recovery: self.downloads.recovery_interval,
        }
    }

    /// Reject settings the sweeps cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        let intervals = self.intervals();
        for (name, value) in [
            ("session expiry interval", intervals.expiry),
            ("outbox sweep interval", intervals.outbox),
            ("download recovery interval", intervals.recovery),
            ("download claim timeout", self.downloads.claim_timeout),
        ] {
            if value.is_zero() {
                return Err(AppError::Configuration {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }
        if self.downloads.claim_timeout <= self.downloads.fetch_timeout {
            return Err(AppError::Configuration {
                message: "download claim timeout must exceed the fetch timeout".to_string(),
            });
        }
        Ok(())
    }
}

/// Create application from environment variables
pub async fn create_app_from_env() -> Result<AppServices, AppError> {
    let config = AppConfig::from_env()?;
    AppBuilder::new().with_config(config).build().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_in_memory_app() {
        let app = create_in_memory_app().await.unwrap();

        assert_eq!(app.dispatcher.listener_count(), 2);
        assert!(app.local_messages.is_some());
    }

    #[tokio::test]
    async fn test_broker_override_has_no_local_feed() {
        let app = AppBuilder::new()
            .with_broker(Arc::new(InMemoryMessageBroker::new()))
            .build()
            .await
            .unwrap();

        assert!(app.local_messages.is_none());
    }

    #[test]
    fn test_default_config_serves_download_bucket() {
        let config = AppConfig::default();
        match config.storage_backend {
            StorageBackend::InMemory { buckets } => {
                assert!(buckets.contains(&config.downloads.default_bucket))
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_is_rejected() {
        let mut config = AppConfig::default();
        config.outbox.sweep_interval = Duration::ZERO;
        let err = AppBuilder::new().with_config(config).build().await.err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));

        let mut config = AppConfig::default();
        config.sessions.expiry_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_claim_timeout_must_exceed_fetch_timeout() {
        let mut config = AppConfig::default();
        config.downloads.claim_timeout = config.downloads.fetch_timeout;
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));
        assert!(AppConfig::default().validate().is_ok());
    }
}
