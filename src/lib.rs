pub mod app;
pub mod assets;
pub mod binder;
pub mod debounce;
pub mod document;
pub mod errors;
pub mod events;
pub mod fetch;
pub mod ids;
pub mod models;
pub mod save;
pub mod settings;

pub use crate::app::App;
pub use crate::binder::{Binder, LoadReport, SaveReport};
pub use crate::errors::{AppError, AppResult};
pub use crate::settings::AppSettings;

use anyhow::Context as _;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Headless entry point: load settings and the workspace, run the autosave
/// loop until ctrl-c, then write a final save.
pub fn run() -> anyhow::Result<()> {
    let config_path = std::env::var_os(settings::CONFIG_PATH_ENV).map(PathBuf::from);
    let settings = AppSettings::load(config_path.as_deref()).context("failed to load settings")?;
    let workspace_dir = settings.require_workspace_dir()?;
    if let Err(error) = init_tracing(&settings.resolved_log_dir(&workspace_dir)) {
        eprintln!("logging disabled: {error}");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async move {
        let mut app = App::open(settings).context("failed to open workspace")?;
        tracing::info!(
            workspace = %workspace_dir.to_string_lossy(),
            notebooks = app.binder().notebooks().len(),
            "freenote started"
        );
        app.run_until(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %error, "ctrl-c handler unavailable; shutting down");
            }
        })
        .await;

        let report = app.shutdown();
        if !report.is_clean() {
            anyhow::bail!("{} notebook(s) failed to save on shutdown", report.failed.len());
        }
        Ok(())
    })
}

fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "freenote.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
