//! The whole run against an open connection: rebuild the schema from the
//! dataset, then answer the questions.

use std::io::Write;
use std::path::Path;

use sqlx::PgConnection;
use tracing::info;

use crate::errors::AnalysisError;
use crate::loader::{ensure_declared_tables_loaded, load_dataset, LoadedTable};
use crate::queries::QUERIES;
use crate::report::answer_all;
use crate::schema::{create_relationships, teardown, validate_relationships, RELATIONSHIPS};

/// Validate the declarations, tear down the previous run, load every CSV in
/// `dataset_dir` and add primary/foreign keys.
///
/// Only teardown is best effort; a load or constraint failure is returned.
pub async fn rebuild_schema(
    conn: &mut PgConnection,
    dataset_dir: &Path,
) -> Result<Vec<LoadedTable>, AnalysisError> {
    validate_relationships(RELATIONSHIPS)?;
    teardown(conn, RELATIONSHIPS).await;

    let loaded = load_dataset(conn, dataset_dir).await?;
    ensure_declared_tables_loaded(&loaded, RELATIONSHIPS)?;
    create_relationships(conn, RELATIONSHIPS).await?;
    info!(tables = loaded.len(), "Relationships created");

    Ok(loaded)
}

/// Rebuild the schema, then print every answer to `out`.
///
/// Nothing is written to `out` unless the schema was rebuilt in full.
pub async fn run<W: Write>(
    conn: &mut PgConnection,
    dataset_dir: &Path,
    out: &mut W,
) -> Result<Vec<LoadedTable>, AnalysisError> {
    let loaded = rebuild_schema(conn, dataset_dir).await?;
    answer_all(conn, QUERIES, out).await?;
    Ok(loaded)
}
