pub mod article;
pub mod config;
pub mod db;
pub mod errors;
pub mod man;
pub mod models;
pub mod policy;
pub mod upload;

use crate::article::ArticleService;
use crate::config::CmsConfig;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::man::ManService;
use crate::upload::UploadAllocator;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Everything the API boundary needs, built once from a [`CmsConfig`].
#[derive(Debug)]
pub struct CmsCore {
    config: CmsConfig,
    db: Arc<Database>,
    mans: ManService,
    articles: ArticleService,
    uploads: UploadAllocator,
}

impl CmsCore {
    pub fn new(config: CmsConfig) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&config.database_path)?);
        std::fs::create_dir_all(&config.upload_root)?;

        tracing::info!(
            database = %db.path().display(),
            upload_root = %config.upload_root.display(),
            "content core ready"
        );

        Ok(Arc::new(Self {
            mans: ManService::new(db.clone()),
            articles: ArticleService::new(db.clone()),
            uploads: UploadAllocator::new(config.upload_root.clone(), config.upload_public_prefix.clone()),
            db,
            config,
        }))
    }

    pub fn from_config_file(path: &Path) -> AppResult<Arc<Self>> {
        let config = CmsConfig::load(path)?;
        Self::new(config)
    }

    pub fn config(&self) -> &CmsConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn mans(&self) -> &ManService {
        &self.mans
    }

    pub fn articles(&self) -> &ArticleService {
        &self.articles
    }

    pub fn uploads(&self) -> &UploadAllocator {
        &self.uploads
    }
}

/// Installs the JSON subscriber writing to a daily rolling file under
/// `log_dir`. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(config: &CmsConfig) -> AppResult<()> {
    std::fs::create_dir_all(&config.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "cms.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
