use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use vision_adapters::http::{HttpApiClient, HttpClientError};
use vision_core::config::{default_config_dir, ConfigError, ConsoleConfig, CONFIG_FILE_NAME};
use vision_core::controller::VisionController;
use vision_core::session::{FileSessionStore, SessionStoreError, SESSION_FILE_NAME};
use vision_tui::TuiError;

const LOG_FILE_NAME: &str = "vision.log";
const LOG_FILTER_ENV: &str = "VISION_LOG";

type Controller = VisionController<HttpApiClient, FileSessionStore>;

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionStoreError),
    #[error(transparent)]
    Http(#[from] HttpClientError),
    #[error(transparent)]
    Tui(#[from] TuiError),
    #[error("failed to prepare {path}: {source}")]
    ConfigDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
}

fn build_runtime() -> Result<Runtime, AppError> {
    Builder::new_multi_thread()
        .enable_all()
        .thread_name("vision-io")
        .build()
        .map_err(AppError::Runtime)
}

fn resolve_datasets(config: &ConsoleConfig, client: &HttpApiClient) -> Vec<String> {
    if !config.datasets.is_empty() {
        return config.datasets.clone();
    }

    match client.fetch_datasets() {
        Ok(datasets) => {
            info!(count = datasets.len(), "loaded datasets from api");
            datasets
        }
        Err(error) => {
            warn!(%error, "failed to list datasets; only pasted urls can select one");
            Vec::new()
        }
    }
}

fn run_app(
    config_dir: &Path,
    run_tui: impl FnOnce(Controller) -> Result<(), TuiError>,
) -> Result<(), AppError> {
    let config = ConsoleConfig::load_from_path(config_dir.join(CONFIG_FILE_NAME))?;
    let session = FileSessionStore::load_from_path(config_dir.join(SESSION_FILE_NAME))?;

    let runtime = build_runtime()?;
    let client = HttpApiClient::from_config(&config, runtime.handle().clone())?;
    let datasets = resolve_datasets(&config, &client);
    info!(
        project = %config.project_id,
        base_url = client.base_url(),
        datasets = datasets.len(),
        "starting console"
    );

    let controller = VisionController::new(client, session, datasets);
    run_tui(controller)?;
    Ok(())
}

fn init_tracing(config_dir: &Path) -> WorkerGuard {
    let appender = tracing_appender::rolling::never(config_dir, LOG_FILE_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    guard
}

fn main() -> Result<(), AppError> {
    let config_dir = default_config_dir()?;
    fs::create_dir_all(&config_dir).map_err(|source| AppError::ConfigDir {
        path: config_dir.clone(),
        source,
    })?;
    let _guard = init_tracing(&config_dir);

    let result = run_app(&config_dir, vision_tui::run);
    if let Err(error) = &result {
        error!(%error, "console exited with an error");
    }
    result
}
