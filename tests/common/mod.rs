//! Shared helpers for tests that need a live Postgres.
//!
//! Each test connects to `TEST_DATABASE_URL` and works inside its own
//! throwaway schema, so tests can run in parallel against one database.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use sqlx::{Connection, PgConnection};

use music_store_analysis::db_utils::quote_ident;

static SCHEMA_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub struct TestDb {
    pub conn: PgConnection,
    pub schema: String,
}

impl TestDb {
    /// Connect and switch `search_path` to a fresh, empty schema.
    pub async fn new() -> Result<Self> {
        let url = std::env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must point at a Postgres database")?;
        let mut conn = PgConnection::connect(&url).await?;

        let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.subsec_nanos();
        let schema = format!(
            "msa_test_{}_{}_{}",
            std::process::id(),
            SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst),
            nanos
        );

        sqlx::raw_sql(&format!("CREATE SCHEMA {}", quote_ident(&schema)))
            .execute(&mut conn)
            .await?;
        sqlx::raw_sql(&format!("SET search_path TO {}", quote_ident(&schema)))
            .execute(&mut conn)
            .await?;

        Ok(TestDb { conn, schema })
    }

    pub async fn cleanup(mut self) -> Result<()> {
        sqlx::raw_sql(&format!("DROP SCHEMA {} CASCADE", quote_ident(&self.schema)))
            .execute(&mut self.conn)
            .await?;
        self.conn.close().await?;
        Ok(())
    }
}

/// A small but complete dataset: Rock has the most tracks, Paris the largest
/// invoice total ($10 + $5), Oslo one $8 invoice.
pub const DATASET: &[(&str, &str)] = &[
    ("artist.csv", "artist_id,artist_name\n1,AC/DC\n2,Miles Davis\n"),
    (
        "album.csv",
        "album_id,title,artist_id\n1,Back in Black,1\n2,Kind of Blue,2\n",
    ),
    ("genre.csv", "genre_id,genre_name\n1,Rock\n2,Jazz\n"),
    ("media_type.csv", "media_type_id,media_type_name\n1,MPEG audio file\n"),
    ("playlist.csv", "playlist_id,playlist_name\n1,Music\n"),
    (
        "track.csv",
        "track_id,track_name,album_id,media_type_id,genre_id,composer,milliseconds,bytes,unit_price\n\
         1,Hells Bells,1,1,1,Angus Young,312000,10000,0.99\n\
         2,Shoot to Thrill,1,1,1,Angus Young,317000,10000,0.99\n\
         3,Back in Black,1,1,1,Angus Young,255000,10000,0.99\n\
         4,So What,2,1,2,Miles Davis,545000,10000,0.99\n\
         5,Blue in Green,2,1,2,Bill Evans,337000,10000,0.99\n",
    ),
    ("playlist_track.csv", "playlist_id,track_id\n1,1\n1,4\n"),
    (
        "employee.csv",
        "employee_id,last_name,first_name,title,reports_to,birthdate,hire_date,email\n\
         1,Adams,Andrew,General Manager,,18-02-1962 00:00,14-08-2016 00:00,andrew@chinookcorp.com\n\
         2,Edwards,Nancy,Sales Manager,1,08-12-1958 00:00,01-05-2016 00:00,nancy@chinookcorp.com\n",
    ),
    (
        "customer.csv",
        "customer_id,first_name,last_name,company,city,country,email,support_rep_id\n\
         1,Camille,Bernard,,Paris,France,camille.bernard@yahoo.fr,2\n\
         2,Dominique,Lefebvre,,Paris,France,dominiquelefebvre@gmail.com,2\n\
         3,Bjorn,Hansen,,Oslo,Norway,bjorn.hansen@yahoo.no,2\n",
    ),
    (
        "invoice.csv",
        "invoice_id,customer_id,invoice_date,billing_address,billing_city,billing_state,billing_country,billing_postal_code,total\n\
         1,1,2017-01-03 00:00:00,4 Rue Letellier,Paris,,France,75015,10.00\n\
         2,2,2017-01-04 00:00:00,8 Rue Hanovre,Paris,,France,75002,5.00\n\
         3,3,2017-01-05 00:00:00,Ullevalsveien 14,Oslo,,Norway,0171,8.00\n",
    ),
    (
        "invoice_line.csv",
        "invoice_line_id,invoice_id,track_id,unit_price,quantity\n\
         1,1,1,0.99,1\n\
         2,1,4,0.99,1\n\
         3,2,2,0.99,1\n\
         4,3,5,0.99,1\n",
    ),
];

/// Write [`DATASET`] into `dir`, leaving out any file named in `skip`.
pub fn write_dataset(dir: &Path, skip: &[&str]) -> Result<()> {
    for (file, contents) in DATASET {
        if skip.contains(file) {
            continue;
        }
        std::fs::write(dir.join(file), contents)?;
    }
    Ok(())
}

/// Append raw CSV lines to a file already written by [`write_dataset`].
pub fn append_rows(dir: &Path, file: &str, rows: &str) -> Result<()> {
    let path = dir.join(file);
    let mut contents = std::fs::read_to_string(&path)?;
    contents.push_str(rows);
    std::fs::write(path, contents)?;
    Ok(())
}

/// Data rows in a fixture file (header excluded).
pub fn fixture_rows(file: &str) -> u64 {
    DATASET
        .iter()
        .find(|(name, _)| *name == file)
        .map(|(_, contents)| contents.lines().count() as u64 - 1)
        .unwrap_or(0)
}
