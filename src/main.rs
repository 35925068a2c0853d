//! Entrypoint: set up tracing, connect to Postgres, rebuild the music-store
//! schema from the CSV dataset, and print answers to the analytical questions.
//!
//! This application uses a strongly-typed configuration (`Settings`) defined in `config.rs`,
//! which provides:
//!  - `db_host` / `db_port` / `db_name` – where the dataset is loaded
//!  - `credentials_file`                – JSON file with `user` and `password`
//!  - `dataset_dir`                     – directory of `<table>.csv` files
//!  - `metrics_file`                    – optional Prometheus textfile output

use std::io;
use std::process;

use sqlx::Connection;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use music_store_analysis::config::{Credentials, Settings};
use music_store_analysis::db_utils::connect;
use music_store_analysis::errors::AnalysisError;
use music_store_analysis::metrics::{self, DDL_STATEMENTS, ROWS_LOADED, TABLES_LOADED, TEARDOWN_FAILURES};
use music_store_analysis::pipeline;

/// Application entrypoint.
///
/// **Workflow**:
/// 1. Initialise tracing/logging from `RUST_LOG` (or default to `info`), on stderr.
/// 2. Load `Config.toml` (and apply any `APP__…` env-var overrides) and the credentials.
/// 3. Open the single Postgres connection; exit with status 1 if that fails.
/// 4. Validate the declared relationships, tear down any previous schema, load
///    every CSV in the dataset directory, add primary/foreign keys, then answer
///    the questions on stdout.
/// 5. Log a summary and emit metrics.
#[tokio::main]
async fn main() -> Result<(), AnalysisError> {
    // ───────────────────────────────────────────────────────────────
    // 1. Initialise tracing / logging
    // ───────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
    info!("Starting music store analysis…");

    // ───────────────────────────────────────────────────────────────
    // 2. Load configuration
    // ───────────────────────────────────────────────────────────────
    let settings = Settings::new()?;
    info!(?settings, "Loaded configuration");
    let credentials = Credentials::from_file(&settings.credentials_file)?;

    // ───────────────────────────────────────────────────────────────
    // 3. Connect
    // ───────────────────────────────────────────────────────────────
    let target = settings.target();
    let mut conn = match connect(&settings.connect_options(&credentials), &target).await {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "Connection failed");
            eprintln!("Error: could not connect to the database ({e})");
            process::exit(1);
        }
    };
    info!(%target, user = %credentials.user, "Connected to Postgres");

    // ───────────────────────────────────────────────────────────────
    // 4. Rebuild the schema & answer the questions
    // ───────────────────────────────────────────────────────────────
    let stdout = io::stdout();
    pipeline::run(&mut conn, &settings.dataset_dir, &mut stdout.lock()).await?;

    // ───────────────────────────────────────────────────────────────
    // 5. Summary & metrics
    // ───────────────────────────────────────────────────────────────
    info!(
        tables = TABLES_LOADED.get(),
        rows = ROWS_LOADED.get(),
        ddl_statements = DDL_STATEMENTS.get(),
        teardown_failures = TEARDOWN_FAILURES.get(),
        "Run complete"
    );

    if let Some(path) = &settings.metrics_file {
        match metrics::write_metrics(path) {
            Ok(()) => info!(path = %path.display(), "Wrote metrics"),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not write metrics"),
        }
    }

    conn.close().await?;
    Ok(())
}
