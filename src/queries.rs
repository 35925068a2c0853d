//! queries.rs
//!
//! The sixteen analytical questions. Each one is a self-contained
//! [`QuerySpec`]: question text, Postgres SQL, and a pure renderer that turns
//! result rows into an [`Answer`]. Running a query and printing it are kept
//! apart so renderers can be tested on hand-built rows.
//!
//! Every selected column must decode through [`Value::decode_row`], so sums
//! and averages are cast to `float8`/`bigint` in the SQL (Postgres would
//! otherwise return NUMERIC).

use std::fmt;
use std::time::Instant;

use sqlx::PgConnection;
use tracing::debug;

use crate::errors::AnalysisError;
use crate::metrics::QUERY_HISTOGRAM;
use crate::value::{format_row, Value};

pub type Row = Vec<Value>;

/// How many rows list answers show by default.
pub const DEFAULT_DISPLAY_LIMIT: usize = 10;

/// Rendered result of one question.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// A single answer line.
    Single(String),
    /// One line per row, cut to the display limit.
    List {
        legend: Option<&'static str>,
        lines: Vec<String>,
        /// Print a closing `...` line after the rows.
        ellipsis: bool,
    },
}

/// One analytical question.
#[derive(Clone, Copy)]
pub struct QuerySpec {
    pub number: u8,
    pub question: &'static str,
    pub sql: &'static str,
    pub render: fn(&QuerySpec, &[Row]) -> Result<Answer, AnalysisError>,
    /// Column legend printed above list answers.
    pub legend: Option<&'static str>,
    /// Maximum rows shown for list answers; `None` shows all.
    pub display_limit: Option<usize>,
    /// Close the list with `...`, whether or not rows were cut.
    pub ellipsis: bool,
}

impl fmt::Debug for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySpec")
            .field("number", &self.number)
            .field("question", &self.question)
            .field("display_limit", &self.display_limit)
            .field("ellipsis", &self.ellipsis)
            .finish_non_exhaustive()
    }
}

impl QuerySpec {
    pub fn answer(&self, rows: &[Row]) -> Result<Answer, AnalysisError> {
        (self.render)(self, rows)
    }

    fn first_row<'r>(&self, rows: &'r [Row]) -> Result<&'r Row, AnalysisError> {
        rows.first().ok_or(AnalysisError::EmptyResult(self.number))
    }

    fn cell<'r>(&self, row: &'r Row, index: usize) -> Result<&'r Value, AnalysisError> {
        row.get(index).ok_or(AnalysisError::Decode {
            query: self.number,
            index,
            expected: "a value",
        })
    }

    fn amount(&self, row: &Row, index: usize) -> Result<f64, AnalysisError> {
        self.cell(row, index)?.as_f64().ok_or(AnalysisError::Decode {
            query: self.number,
            index,
            expected: "a number",
        })
    }

    /// The `...` marker is fixed per question, not tied to whether rows were
    /// dropped: sample-style lists always end with it.
    fn cut<I>(&self, lines: I) -> Answer
    where
        I: Iterator<Item = String>,
    {
        let limit = self.display_limit.unwrap_or(usize::MAX);
        Answer::List {
            legend: self.legend,
            lines: lines.take(limit).collect(),
            ellipsis: self.ellipsis,
        }
    }
}

/// `$` plus `amount` rounded to `decimals` places, trailing zeros dropped.
pub fn format_currency(amount: f64, decimals: i32) -> String {
    let factor = 10f64.powi(decimals);
    let rounded = (amount * factor).round() / factor;
    // avoid printing "-0"
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("${rounded}")
}

fn render_value(spec: &QuerySpec, rows: &[Row]) -> Result<Answer, AnalysisError> {
    let row = spec.first_row(rows)?;
    Ok(Answer::Single(spec.cell(row, 0)?.plain()))
}

fn render_full_name(spec: &QuerySpec, rows: &[Row]) -> Result<Answer, AnalysisError> {
    let row = spec.first_row(rows)?;
    Ok(Answer::Single(format!(
        "{} {}",
        spec.cell(row, 0)?.plain(),
        spec.cell(row, 1)?.plain()
    )))
}

fn render_invoice_total(spec: &QuerySpec, rows: &[Row]) -> Result<Answer, AnalysisError> {
    let row = spec.first_row(rows)?;
    Ok(Answer::Single(format!(
        "{} with an invoice total of {}",
        spec.cell(row, 0)?.plain(),
        format_currency(spec.amount(row, 1)?, 2)
    )))
}

fn render_labeled_amounts(spec: &QuerySpec, rows: &[Row]) -> Result<Answer, AnalysisError> {
    let lines = rows
        .iter()
        .map(|row| {
            Ok(format!(
                "{}: {}",
                spec.cell(row, 0)?.plain(),
                format_currency(spec.amount(row, 1)?, 0)
            ))
        })
        .collect::<Result<Vec<_>, AnalysisError>>()?;
    Ok(spec.cut(lines.into_iter()))
}

fn render_rows(spec: &QuerySpec, rows: &[Row]) -> Result<Answer, AnalysisError> {
    Ok(spec.cut(rows.iter().map(|row| format_row(row))))
}

/// The questions, in the order they are answered.
pub static QUERIES: &[QuerySpec] = &[
    QuerySpec {
        number: 1,
        question: "What is the most popular music genre?",
        sql: "SELECT genre.genre_name, COUNT(track.genre_id) AS popularity
              FROM track
              JOIN genre ON track.genre_id = genre.genre_id
              GROUP BY genre.genre_name
              ORDER BY popularity DESC, genre.genre_name
              LIMIT 1",
        render: render_value,
        legend: None,
        display_limit: None,
        ellipsis: false,
    },
    QuerySpec {
        number: 2,
        question: "Who is the most popular artist?",
        sql: "SELECT artist.artist_name, COUNT(invoice_line.quantity) AS purchases
              FROM invoice_line
              JOIN track ON track.track_id = invoice_line.track_id
              JOIN album ON album.album_id = track.album_id
              JOIN artist ON artist.artist_id = album.artist_id
              GROUP BY artist.artist_name
              ORDER BY purchases DESC, artist.artist_name
              LIMIT 1",
        render: render_value,
        legend: None,
        display_limit: None,
        ellipsis: false,
    },
    QuerySpec {
        number: 3,
        question: "What is the most popular song?",
        sql: "SELECT track.track_name, COUNT(invoice_line.quantity) AS purchases
              FROM invoice_line
              JOIN track ON track.track_id = invoice_line.track_id
              GROUP BY track.track_name
              ORDER BY purchases DESC, track.track_name
              LIMIT 1",
        render: render_value,
        legend: None,
        display_limit: None,
        ellipsis: false,
    },
    QuerySpec {
        number: 4,
        question: "What is the average amount spent on each type of music?",
        sql: "WITH purchases AS (
                  SELECT genre.genre_name AS genre, SUM(invoice.total) AS total_spent
                  FROM invoice
                  JOIN invoice_line ON invoice_line.invoice_id = invoice.invoice_id
                  JOIN track ON track.track_id = invoice_line.track_id
                  JOIN genre ON genre.genre_id = track.genre_id
                  GROUP BY genre.genre_name
              )
              SELECT genre, AVG(total_spent)::float8 AS average_spent
              FROM purchases
              GROUP BY genre
              ORDER BY genre",
        render: render_labeled_amounts,
        legend: None,
        display_limit: None,
        ellipsis: false,
    },
    QuerySpec {
        number: 5,
        question: "Which country buys the most music?",
        sql: "SELECT customer.country, SUM(invoice_line.quantity)::bigint AS invoice_quantity
              FROM invoice_line
              JOIN invoice ON invoice.invoice_id = invoice_line.invoice_id
              JOIN customer ON customer.customer_id = invoice.customer_id
              GROUP BY customer.country
              ORDER BY invoice_quantity DESC, customer.country
              LIMIT 1",
        render: render_value,
        legend: None,
        display_limit: None,
        ellipsis: false,
    },
    QuerySpec {
        number: 6,
        question: "Who is the longest-serving employee?",
        sql: "SELECT first_name, last_name
              FROM employee
              ORDER BY hire_date ASC
              LIMIT 1",
        render: render_full_name,
        legend: None,
        display_limit: None,
        ellipsis: false,
    },
    QuerySpec {
        number: 7,
        question: "Which country has the most invoices?",
        sql: "SELECT billing_country, COUNT(invoice_id) AS invoice_quantity
              FROM invoice
              GROUP BY billing_country
              ORDER BY invoice_quantity DESC, billing_country
              LIMIT 1",
        render: render_value,
        legend: None,
        display_limit: None,
        ellipsis: false,
    },
    QuerySpec {
        number: 8,
        question: "What are the top 3 invoices by total?",
        sql: "SELECT *
              FROM invoice
              ORDER BY total DESC
              LIMIT 3",
        render: render_rows,
        legend: None,
        display_limit: Some(3),
        ellipsis: false,
    },
    QuerySpec {
        number: 9,
        question: "Which city has the best customers?",
        sql: "SELECT billing_city, SUM(total)::float8 AS invoice_total
              FROM invoice
              GROUP BY billing_city
              ORDER BY invoice_total DESC, billing_city
              LIMIT 1",
        render: render_invoice_total,
        legend: None,
        display_limit: None,
        ellipsis: false,
    },
    QuerySpec {
        number: 10,
        question: "Who is the best customer?",
        sql: "SELECT CONCAT(customer.first_name, ' ', customer.last_name) AS customer_name,
                     SUM(invoice.total)::float8 AS invoice_total
              FROM invoice
              JOIN customer ON customer.customer_id = invoice.customer_id
              GROUP BY customer.customer_id, customer.first_name, customer.last_name
              ORDER BY invoice_total DESC, customer.customer_id
              LIMIT 1",
        render: render_invoice_total,
        legend: None,
        display_limit: None,
        ellipsis: false,
    },
    QuerySpec {
        number: 11,
        question: "Who are the rock listeners, ordered by email?",
        sql: "SELECT DISTINCT customer.first_name, customer.last_name, customer.email, genre.genre_name
              FROM customer
              JOIN invoice ON invoice.customer_id = customer.customer_id
              JOIN invoice_line ON invoice_line.invoice_id = invoice.invoice_id
              JOIN track ON track.track_id = invoice_line.track_id
              JOIN genre ON genre.genre_id = track.genre_id
              WHERE genre.genre_name = 'Rock'
              ORDER BY customer.email ASC",
        render: render_rows,
        legend: Some("(First name x Last name x Email x Genre)"),
        display_limit: Some(DEFAULT_DISPLAY_LIMIT),
        ellipsis: true,
    },
    QuerySpec {
        number: 12,
        question: "Which are the top 10 rock bands?",
        sql: "SELECT COUNT(track.track_id) AS num_songs, artist.artist_name
              FROM track
              JOIN album ON album.album_id = track.album_id
              JOIN artist ON artist.artist_id = album.artist_id
              WHERE track.genre_id IN (
                  SELECT genre.genre_id FROM genre WHERE genre.genre_name = 'Rock'
              )
              GROUP BY artist.artist_id, artist.artist_name
              ORDER BY num_songs DESC, artist.artist_name
              LIMIT 10",
        render: render_rows,
        legend: Some("(Number of songs x Band)"),
        display_limit: Some(DEFAULT_DISPLAY_LIMIT),
        ellipsis: true,
    },
    QuerySpec {
        number: 13,
        question: "Which tracks are longer than average?",
        sql: "SELECT track.track_name, track.milliseconds
              FROM track
              WHERE track.milliseconds > (SELECT AVG(milliseconds) FROM track)
              ORDER BY track.milliseconds DESC",
        render: render_rows,
        legend: Some("(Track x Duration (ms))"),
        display_limit: Some(DEFAULT_DISPLAY_LIMIT),
        ellipsis: true,
    },
    QuerySpec {
        number: 14,
        question: "How much has each customer spent on each artist?",
        sql: "WITH artists_name AS (
                  SELECT artist.artist_id AS artist_id, artist.artist_name AS artist_name
                  FROM invoice_line
                  JOIN track ON track.track_id = invoice_line.track_id
                  JOIN album ON album.album_id = track.album_id
                  JOIN artist ON artist.artist_id = album.artist_id
                  GROUP BY artist.artist_id, artist.artist_name
              )
              SELECT customer.customer_id AS customer_id,
                     customer.first_name AS first_name,
                     artists_name.artist_name AS artist_name,
                     SUM(invoice_line.unit_price * invoice_line.quantity)::float8 AS total_spent
              FROM invoice
              JOIN customer ON customer.customer_id = invoice.customer_id
              JOIN invoice_line ON invoice_line.invoice_id = invoice.invoice_id
              JOIN track ON track.track_id = invoice_line.track_id
              JOIN album ON album.album_id = track.album_id
              JOIN artists_name ON artists_name.artist_id = album.artist_id
              GROUP BY 1, 2, 3
              ORDER BY 4 DESC, 1, 3",
        render: render_rows,
        legend: Some("(Customer id x Customer first name x Artist x Total spent)"),
        display_limit: Some(DEFAULT_DISPLAY_LIMIT),
        ellipsis: true,
    },
    QuerySpec {
        number: 15,
        question: "What is the most popular music genre in each country?",
        sql: "WITH popular_genre AS (
                  SELECT COUNT(invoice_line.quantity) AS purchases,
                         customer.country AS country,
                         genre.genre_name AS genre_name,
                         ROW_NUMBER() OVER (
                             PARTITION BY customer.country
                             ORDER BY COUNT(invoice_line.quantity) DESC, genre.genre_name
                         ) AS row_num
                  FROM invoice_line
                  JOIN invoice ON invoice.invoice_id = invoice_line.invoice_id
                  JOIN customer ON customer.customer_id = invoice.customer_id
                  JOIN track ON track.track_id = invoice_line.track_id
                  JOIN genre ON genre.genre_id = track.genre_id
                  GROUP BY customer.country, genre.genre_name
              )
              SELECT country, genre_name, purchases
              FROM popular_genre
              WHERE row_num <= 1
              ORDER BY country",
        render: render_rows,
        legend: Some("(Country x Genre x Purchases)"),
        display_limit: Some(DEFAULT_DISPLAY_LIMIT),
        ellipsis: true,
    },
    QuerySpec {
        number: 16,
        question: "Which customer spent the most in each country?",
        sql: "WITH total_customer_country AS (
                  SELECT customer.first_name AS first_name,
                         invoice.billing_country AS billing_country,
                         SUM(invoice.total)::float8 AS total_spent,
                         ROW_NUMBER() OVER (
                             PARTITION BY invoice.billing_country
                             ORDER BY SUM(invoice.total) DESC, customer.customer_id
                         ) AS row_num
                  FROM customer
                  JOIN invoice ON invoice.customer_id = customer.customer_id
                  GROUP BY customer.customer_id, customer.first_name, invoice.billing_country
              )
              SELECT first_name, billing_country, total_spent
              FROM total_customer_country
              WHERE row_num = 1
              ORDER BY billing_country",
        render: render_rows,
        legend: Some("(Customer first name x Country x Total spent)"),
        display_limit: Some(DEFAULT_DISPLAY_LIMIT),
        ellipsis: true,
    },
];

/// Execute `spec` and decode every row.
pub async fn run_query(conn: &mut PgConnection, spec: &QuerySpec) -> Result<Vec<Row>, AnalysisError> {
    let started = Instant::now();

    let rows = sqlx::query(spec.sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AnalysisError::Query(spec.number, e))?;

    let elapsed = started.elapsed().as_secs_f64();
    QUERY_HISTOGRAM.observe(elapsed);
    debug!(query = spec.number, rows = rows.len(), duration_s = elapsed, "Query finished");

    rows.iter().map(Value::decode_row).collect()
}

/// Look up a question by its number.
pub fn query(number: u8) -> Option<&'static QuerySpec> {
    QUERIES.iter().find(|q| q.number == number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn sixteen_questions_numbered_in_order() {
        assert_eq!(QUERIES.len(), 16);
        for (i, q) in QUERIES.iter().enumerate() {
            assert_eq!(q.number as usize, i + 1);
        }
    }

    #[test]
    fn country_query_joins_invoice_on_invoice_id() {
        let sql = query(5).unwrap().sql;
        assert!(sql.contains("invoice.invoice_id = invoice_line.invoice_id"));
        assert!(!sql.contains("invoice_line.invoice_line_id"));
    }

    #[test]
    fn currency_drops_trailing_zeros() {
        assert_eq!(format_currency(15.0, 2), "$15");
        assert_eq!(format_currency(15.5, 2), "$15.5");
        assert_eq!(format_currency(144.540_000_1, 2), "$144.54");
        assert_eq!(format_currency(39.6, 0), "$40");
        assert_eq!(format_currency(-0.001, 2), "$0");
    }

    #[test]
    fn most_popular_genre_is_first_column() {
        let rows = vec![vec![text("Rock"), Value::Int(1297)]];
        assert_eq!(
            query(1).unwrap().answer(&rows).unwrap(),
            Answer::Single("Rock".into())
        );
    }

    #[test]
    fn best_city_reports_rounded_total() {
        let rows = vec![vec![text("Paris"), Value::Float(15.0)]];
        assert_eq!(
            query(9).unwrap().answer(&rows).unwrap(),
            Answer::Single("Paris with an invoice total of $15".into())
        );
    }

    #[test]
    fn longest_serving_employee_joins_names() {
        let rows = vec![vec![text("Andrew"), text("Adams")]];
        assert_eq!(
            query(6).unwrap().answer(&rows).unwrap(),
            Answer::Single("Andrew Adams".into())
        );
    }

    #[test]
    fn genre_averages_are_whole_dollars() {
        let rows = vec![
            vec![text("Blues"), Value::Float(524.7)],
            vec![text("Jazz"), Value::Int(100)],
        ];
        assert_eq!(
            query(4).unwrap().answer(&rows).unwrap(),
            Answer::List {
                legend: None,
                lines: vec!["Blues: $525".into(), "Jazz: $100".into()],
                ellipsis: false,
            }
        );
    }

    #[test]
    fn list_answers_are_cut_to_limit() {
        let rows: Vec<Row> = (0..12)
            .map(|i| vec![text(&format!("track {i}")), Value::Int(400_000 - i)])
            .collect();

        match query(13).unwrap().answer(&rows).unwrap() {
            Answer::List { legend, lines, ellipsis } => {
                assert_eq!(legend, Some("(Track x Duration (ms))"));
                assert_eq!(lines.len(), DEFAULT_DISPLAY_LIMIT);
                assert_eq!(lines[0], "('track 0', 400000)");
                assert!(ellipsis);
            }
            other => panic!("unexpected answer {other:?}"),
        }
    }

    #[test]
    fn sample_lists_always_close_with_ellipsis() {
        let rows: Vec<Row> = (0..10)
            .map(|i| vec![Value::Int(20 - i), text(&format!("band {i}"))])
            .collect();
        match query(12).unwrap().answer(&rows).unwrap() {
            Answer::List { lines, ellipsis, .. } => {
                assert_eq!(lines.len(), 10);
                assert_eq!(lines[0], "(20, 'band 0')");
                assert!(ellipsis);
            }
            other => panic!("unexpected answer {other:?}"),
        }

        let rows = vec![vec![Value::Int(5), text("AC/DC")]];
        match query(12).unwrap().answer(&rows).unwrap() {
            Answer::List { lines, ellipsis, .. } => {
                assert_eq!(lines, vec!["(5, 'AC/DC')".to_string()]);
                assert!(ellipsis);
            }
            other => panic!("unexpected answer {other:?}"),
        }
    }

    #[test]
    fn full_lists_have_no_ellipsis() {
        let ellipsis_questions: Vec<u8> = QUERIES
            .iter()
            .filter(|q| q.ellipsis)
            .map(|q| q.number)
            .collect();
        assert_eq!(ellipsis_questions, vec![11, 12, 13, 14, 15, 16]);

        let rows: Vec<Row> = (0..3).map(|i| vec![Value::Int(i), Value::Float(10.0 - i as f64)]).collect();
        match query(8).unwrap().answer(&rows).unwrap() {
            Answer::List { lines, ellipsis, .. } => {
                assert_eq!(lines.len(), 3);
                assert!(!ellipsis);
            }
            other => panic!("unexpected answer {other:?}"),
        }
    }

    #[test]
    fn empty_result_for_single_answer_is_an_error() {
        let err = query(7).unwrap().answer(&[]).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyResult(7)));
    }

    #[test]
    fn non_numeric_total_is_a_decode_error() {
        let rows = vec![vec![text("Paris"), text("lots")]];
        let err = query(9).unwrap().answer(&rows).unwrap_err();
        assert!(matches!(err, AnalysisError::Decode { query: 9, index: 1, .. }));
    }
}
