use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};

use crate::errors::AnalysisError;
use crate::metrics::DDL_STATEMENTS;

/// Opens the single connection used for the whole run.
///
/// # Arguments
///
/// * `options` - Host, port, database and login to connect with.
/// * `target` - Human-readable `host:port/db`, only used in the error.
///
/// # Returns
///
/// * `Ok(PgConnection)` - A live connection.
/// * `Err(AnalysisError::Connect)` - If the server is unreachable or refuses the login.
pub async fn connect(options: &PgConnectOptions, target: &str) -> Result<PgConnection, AnalysisError> {
    PgConnection::connect_with(options)
        .await
        .map_err(|e| AnalysisError::Connect(target.to_string(), e))
}

/// Double-quote an identifier, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Runs one DDL statement over the simple query protocol.
///
/// Successful statements are counted in `ddl_statements_total`.
pub async fn execute_ddl(conn: &mut PgConnection, sql: &str) -> Result<(), AnalysisError> {
    sqlx::raw_sql(sql).execute(&mut *conn).await?;
    DDL_STATEMENTS.inc();
    Ok(())
}

/// Whether `table` exists in the current schema.
pub async fn table_exists(conn: &mut PgConnection, table: &str) -> Result<bool, AnalysisError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name::text = $1
        )",
    )
    .bind(table)
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

/// Names of the foreign-key constraints defined on `table`, read from the catalog.
///
/// # Notes
///
/// Returns an empty list if the table does not exist.
pub async fn foreign_key_constraints(
    conn: &mut PgConnection,
    table: &str,
) -> Result<Vec<String>, AnalysisError> {
    let names = sqlx::query_scalar(
        "SELECT constraint_name::text
         FROM information_schema.table_constraints
         WHERE table_schema = current_schema()
           AND table_name::text = $1
           AND constraint_type = 'FOREIGN KEY'
         ORDER BY constraint_name",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    Ok(names)
}

/// Number of rows currently in `table`.
pub async fn row_count(conn: &mut PgConnection, table: &str) -> Result<i64, AnalysisError> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
        .fetch_one(&mut *conn)
        .await?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::quote_ident;

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("invoice"), "\"invoice\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
