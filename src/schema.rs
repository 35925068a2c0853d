//! schema.rs
//!
//! Declared primary/foreign key relationships for the music-store tables and
//! the bootstrapper that tears them down before a load and wires them back up
//! afterwards.

use std::collections::{HashMap, HashSet};

use sqlx::PgConnection;
use tracing::{debug, info, warn};

use crate::db_utils::{execute_ddl, foreign_key_constraints, quote_ident, table_exists};
use crate::errors::AnalysisError;
use crate::metrics::TEARDOWN_FAILURES;

/// A foreign-key column and the primary key it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub referenced_table: &'static str,
    pub referenced_column: &'static str,
}

impl ForeignKey {
    pub const fn new(
        column: &'static str,
        referenced_table: &'static str,
        referenced_column: &'static str,
    ) -> Self {
        ForeignKey {
            column,
            referenced_table,
            referenced_column,
        }
    }
}

/// Key declarations for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub primary_key: Option<&'static str>,
    pub foreign_keys: &'static [ForeignKey],
}

/// Every table the analysis depends on, in declaration order.
pub static RELATIONSHIPS: &[TableSpec] = &[
    TableSpec {
        name: "artist",
        primary_key: Some("artist_id"),
        foreign_keys: &[],
    },
    TableSpec {
        name: "playlist",
        primary_key: Some("playlist_id"),
        foreign_keys: &[],
    },
    TableSpec {
        name: "media_type",
        primary_key: Some("media_type_id"),
        foreign_keys: &[],
    },
    TableSpec {
        name: "genre",
        primary_key: Some("genre_id"),
        foreign_keys: &[],
    },
    TableSpec {
        name: "album",
        primary_key: Some("album_id"),
        foreign_keys: &[ForeignKey::new("artist_id", "artist", "artist_id")],
    },
    TableSpec {
        name: "customer",
        primary_key: Some("customer_id"),
        foreign_keys: &[ForeignKey::new("support_rep_id", "employee", "employee_id")],
    },
    TableSpec {
        name: "employee",
        primary_key: Some("employee_id"),
        foreign_keys: &[ForeignKey::new("reports_to", "employee", "employee_id")],
    },
    TableSpec {
        name: "invoice",
        primary_key: Some("invoice_id"),
        foreign_keys: &[ForeignKey::new("customer_id", "customer", "customer_id")],
    },
    TableSpec {
        name: "invoice_line",
        primary_key: Some("invoice_line_id"),
        foreign_keys: &[
            ForeignKey::new("invoice_id", "invoice", "invoice_id"),
            ForeignKey::new("track_id", "track", "track_id"),
        ],
    },
    TableSpec {
        name: "playlist_track",
        primary_key: None,
        foreign_keys: &[
            ForeignKey::new("playlist_id", "playlist", "playlist_id"),
            ForeignKey::new("track_id", "track", "track_id"),
        ],
    },
    TableSpec {
        name: "track",
        primary_key: Some("track_id"),
        foreign_keys: &[
            ForeignKey::new("album_id", "album", "album_id"),
            ForeignKey::new("media_type_id", "media_type", "media_type_id"),
            ForeignKey::new("genre_id", "genre", "genre_id"),
        ],
    },
];

/// Check that the declarations are referentially complete before any DDL runs.
///
/// Every foreign key must point at a declared table, and at that table's
/// declared primary key.
pub fn validate_relationships(tables: &[TableSpec]) -> Result<(), AnalysisError> {
    let mut primary_keys: HashMap<&str, Option<&str>> = HashMap::new();
    for table in tables {
        if primary_keys.insert(table.name, table.primary_key).is_some() {
            return Err(AnalysisError::InvalidSchema(format!(
                "table {} is declared more than once",
                table.name
            )));
        }
    }

    for table in tables {
        let mut seen = HashSet::new();
        for fk in table.foreign_keys {
            if !seen.insert(fk.column) {
                return Err(AnalysisError::InvalidSchema(format!(
                    "{}.{} has more than one foreign key",
                    table.name, fk.column
                )));
            }

            match primary_keys.get(fk.referenced_table) {
                None => {
                    return Err(AnalysisError::InvalidSchema(format!(
                        "{}.{} references undeclared table {}",
                        table.name, fk.column, fk.referenced_table
                    )))
                }
                Some(pk) if *pk != Some(fk.referenced_column) => {
                    return Err(AnalysisError::InvalidSchema(format!(
                        "{}.{} references {}({}), which is not its primary key",
                        table.name, fk.column, fk.referenced_table, fk.referenced_column
                    )))
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

/// `ALTER TABLE .. ALTER COLUMN .. TYPE INTEGER`, casting existing values.
pub fn coerce_integer_sql(table: &str, column: &str) -> String {
    let column = quote_ident(column);
    format!(
        "ALTER TABLE {} ALTER COLUMN {column} TYPE INTEGER USING {column}::integer",
        quote_ident(table)
    )
}

pub fn add_primary_key_sql(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} ADD PRIMARY KEY ({})",
        quote_ident(table),
        quote_ident(column)
    )
}

pub fn add_foreign_key_sql(table: &str, fk: &ForeignKey) -> String {
    format!(
        "ALTER TABLE {} ADD FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(table),
        quote_ident(fk.column),
        quote_ident(fk.referenced_table),
        quote_ident(fk.referenced_column)
    )
}

pub fn drop_constraint_sql(table: &str, constraint: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_ident(table),
        quote_ident(constraint)
    )
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

/// Remove every declared table, best effort.
///
/// All foreign keys on all existing tables go first, then the tables, so no
/// drop is blocked by a reference from a table that has not been dropped yet.
/// Nothing here is fatal: failures are logged and counted.
pub async fn teardown(conn: &mut PgConnection, tables: &[TableSpec]) {
    for table in tables {
        match table_exists(conn, table.name).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(table = table.name, "Table absent, nothing to tear down");
                continue;
            }
            Err(e) => {
                TEARDOWN_FAILURES.inc();
                warn!(table = table.name, error = %e, "Could not inspect table");
                continue;
            }
        }

        let constraints = match foreign_key_constraints(conn, table.name).await {
            Ok(names) => names,
            Err(e) => {
                TEARDOWN_FAILURES.inc();
                warn!(table = table.name, error = %e, "Could not list foreign keys");
                continue;
            }
        };

        for constraint in constraints {
            let sql = drop_constraint_sql(table.name, &constraint);
            if let Err(e) = execute_ddl(conn, &sql).await {
                TEARDOWN_FAILURES.inc();
                debug!(table = table.name, %constraint, error = %e, "Ignoring failed foreign key drop");
            }
        }
    }

    for table in tables {
        if let Err(e) = execute_ddl(conn, &drop_table_sql(table.name)).await {
            TEARDOWN_FAILURES.inc();
            debug!(table = table.name, error = %e, "Ignoring failed table drop");
        }
    }

    info!(tables = tables.len(), "Teardown complete");
}

/// Add all primary keys, then all foreign keys. Any failure aborts.
///
/// Key columns are coerced to INTEGER first; foreign keys can only be added
/// once the primary key they reference exists, hence the two passes.
pub async fn create_relationships(
    conn: &mut PgConnection,
    tables: &[TableSpec],
) -> Result<(), AnalysisError> {
    for table in tables {
        if let Some(pk) = table.primary_key {
            info!(table = table.name, column = pk, "Adding primary key");
            execute_ddl(conn, &coerce_integer_sql(table.name, pk)).await?;
            execute_ddl(conn, &add_primary_key_sql(table.name, pk)).await?;
        }
    }

    for table in tables {
        for fk in table.foreign_keys {
            info!(
                table = table.name,
                column = fk.column,
                references = %format!("{}({})", fk.referenced_table, fk.referenced_column),
                "Adding foreign key"
            );
            execute_ddl(conn, &coerce_integer_sql(table.name, fk.column)).await?;
            execute_ddl(conn, &add_foreign_key_sql(table.name, fk)).await?;
        }
    }

    Ok(())
}
