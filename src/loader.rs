//! loader.rs
//!
//! CSV ingestion: discover the dataset files, infer a column type for each
//! column, coerce the declared date columns, and bulk-load every file into a
//! freshly replaced Postgres table.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sqlx::query_builder::Separated;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::db_utils::quote_ident;
use crate::errors::AnalysisError;
use crate::metrics::{ROWS_LOADED, TABLES_LOADED};
use crate::schema::TableSpec;
use crate::value::Value;

/// Columns parsed as timestamps instead of being left to inference.
pub const DATE_COLUMNS: &[(&str, &str)] = &[
    ("employee", "hire_date"),
    ("employee", "birthdate"),
    ("invoice", "invoice_date"),
];

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;
const MAX_ROWS_PER_INSERT: usize = 1_000;

/// Formats tried, in order, for date-time values.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Formats tried, in order, for date-only values (midnight is assumed).
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%m/%d/%Y"];

/// Storage type chosen for a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    Double,
    Text,
    Timestamp,
}

impl ColumnType {
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

/// One CSV file, parsed and typed, ready to be loaded.
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub name: String,
    pub columns: Vec<String>,
    pub types: Vec<ColumnType>,
    pub rows: Vec<Vec<Value>>,
}

/// Outcome of loading one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub name: String,
    pub source: PathBuf,
    pub rows: u64,
}

/// Table name for a dataset file: everything before the first `.`.
pub fn table_name_for(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    file_name
        .split('.')
        .next()
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// All `*.csv` files in `dir`, sorted by file name, paired with their table names.
pub fn discover_csv_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, AnalysisError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));
        if !path.is_file() || !is_csv {
            continue;
        }
        if let Some(name) = table_name_for(&path) {
            files.push((name, path));
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Parse a date-time in any of the accepted formats.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Narrowest type that every non-empty value fits, TEXT for an all-empty column.
pub fn infer_column_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut seen_any = false;
    let mut all_int = true;
    let mut all_float = true;

    for value in values.into_iter().flatten() {
        seen_any = true;
        let value = value.trim();
        if all_int && value.parse::<i64>().is_err() {
            all_int = false;
        }
        if !all_int && value.parse::<f64>().is_err() {
            all_float = false;
            break;
        }
    }

    match (seen_any, all_int, all_float) {
        (false, _, _) => ColumnType::Text,
        (true, true, _) => ColumnType::BigInt,
        (true, false, true) => ColumnType::Double,
        _ => ColumnType::Text,
    }
}

fn convert_cell(raw: Option<&str>, ty: ColumnType) -> Option<Value> {
    let Some(raw) = raw else {
        return Some(Value::Null);
    };
    match ty {
        ColumnType::BigInt => raw.trim().parse().ok().map(Value::Int),
        ColumnType::Double => raw.trim().parse().ok().map(Value::Float),
        ColumnType::Text => Some(Value::Text(raw.to_string())),
        ColumnType::Timestamp => parse_timestamp(raw).map(Value::Timestamp),
    }
}

/// Read and type one CSV file. `date_columns` are coerced to timestamps.
pub fn read_csv_table(
    name: &str,
    path: &Path,
    date_columns: &[&str],
) -> Result<CsvTable, AnalysisError> {
    let csv_err = |e| AnalysisError::Csv(path.to_path_buf(), e);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(csv_err)?;

    let columns: Vec<String> = reader
        .byte_headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_string())
        .collect();

    for date_column in date_columns {
        if !columns.iter().any(|c| c == date_column) {
            return Err(AnalysisError::MissingColumn {
                table: name.to_string(),
                column: date_column.to_string(),
            });
        }
    }

    let mut raw_rows: Vec<Vec<Option<String>>> = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(csv_err)?;
        raw_rows.push(
            record
                .iter()
                .map(|field| {
                    let field = String::from_utf8_lossy(field);
                    (!field.is_empty()).then(|| field.into_owned())
                })
                .collect(),
        );
    }

    let types: Vec<ColumnType> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            if date_columns.contains(&column.as_str()) {
                ColumnType::Timestamp
            } else {
                infer_column_type(raw_rows.iter().map(|row| row[i].as_deref()))
            }
        })
        .collect();

    let mut rows = Vec::with_capacity(raw_rows.len());
    for (row_index, raw_row) in raw_rows.iter().enumerate() {
        let mut row = Vec::with_capacity(columns.len());
        for ((raw, ty), column) in raw_row.iter().zip(&types).zip(&columns) {
            let value = convert_cell(raw.as_deref(), *ty).ok_or_else(|| AnalysisError::Timestamp {
                table: name.to_string(),
                column: column.clone(),
                row: row_index + 1,
                value: raw.clone().unwrap_or_default(),
            })?;
            row.push(value);
        }
        rows.push(row);
    }

    debug!(table = name, columns = columns.len(), rows = rows.len(), "Parsed CSV");

    Ok(CsvTable {
        name: name.to_string(),
        columns,
        types,
        rows,
    })
}

pub fn create_table_sql(table: &CsvTable) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .zip(&table.types)
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql_name()))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(&table.name), columns.join(", "))
}

/// Rows per multi-row INSERT for a table of `columns` columns.
pub fn rows_per_insert(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).clamp(1, MAX_ROWS_PER_INSERT)
}

fn bind_value(b: &mut Separated<'_, '_, Postgres, &'static str>, value: &Value, ty: ColumnType) {
    match value {
        Value::Null => match ty {
            ColumnType::BigInt => b.push_bind(None::<i64>),
            ColumnType::Double => b.push_bind(None::<f64>),
            ColumnType::Text => b.push_bind(None::<String>),
            ColumnType::Timestamp => b.push_bind(None::<NaiveDateTime>),
        },
        Value::Bool(v) => b.push_bind(*v),
        Value::Int(v) => b.push_bind(*v),
        Value::Float(v) => b.push_bind(*v),
        Value::Text(v) => b.push_bind(v.clone()),
        Value::Timestamp(v) => b.push_bind(*v),
    };
}

/// Replace `table` in the database with the parsed rows, in one transaction.
pub async fn load_table(conn: &mut PgConnection, table: &CsvTable) -> Result<u64, AnalysisError> {
    let mut tx = conn.begin().await?;

    sqlx::raw_sql(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table.name)))
        .execute(&mut *tx)
        .await?;
    sqlx::raw_sql(&create_table_sql(table))
        .execute(&mut *tx)
        .await?;

    let column_list: Vec<String> = table.columns.iter().map(|c| quote_ident(c)).collect();
    let mut inserted = 0u64;

    for chunk in table.rows.chunks(rows_per_insert(table.columns.len())) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            quote_ident(&table.name),
            column_list.join(", ")
        ));
        qb.push_values(chunk, |mut b, row| {
            for (value, ty) in row.iter().zip(&table.types) {
                bind_value(&mut b, value, *ty);
            }
        });
        inserted += qb.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Load every CSV in `dir`, replacing tables of the same name.
pub async fn load_dataset(
    conn: &mut PgConnection,
    dir: &Path,
) -> Result<Vec<LoadedTable>, AnalysisError> {
    let files = discover_csv_files(dir)?;
    info!(dir = %dir.display(), files = files.len(), "Discovered dataset files");

    let mut loaded = Vec::with_capacity(files.len());
    for (name, path) in files {
        let started = Instant::now();
        let date_columns: Vec<&str> = DATE_COLUMNS
            .iter()
            .filter(|(table, _)| *table == name)
            .map(|(_, column)| *column)
            .collect();

        let table = read_csv_table(&name, &path, &date_columns)?;
        let rows = load_table(conn, &table).await?;

        TABLES_LOADED.inc();
        ROWS_LOADED.inc_by(rows);

        let entry = LoadedTable {
            name,
            source: path,
            rows,
        };
        info!(
            table = %entry.name,
            source = %entry.source.display(),
            rows = entry.rows,
            duration_s = started.elapsed().as_secs_f64(),
            "Loaded table"
        );
        loaded.push(entry);
    }

    Ok(loaded)
}

/// Every declared table must have come from the dataset.
pub fn ensure_declared_tables_loaded(
    loaded: &[LoadedTable],
    tables: &[TableSpec],
) -> Result<(), AnalysisError> {
    let names: HashSet<&str> = loaded.iter().map(|t| t.name.as_str()).collect();
    match tables.iter().find(|t| !names.contains(t.name)) {
        Some(missing) => Err(AnalysisError::MissingTable(missing.name.to_string())),
        None => Ok(()),
    }
}
