//! Console output for answered questions.

use std::io::{self, Write};

use sqlx::PgConnection;
use tracing::info;

use crate::errors::AnalysisError;
use crate::queries::{run_query, Answer, QuerySpec};

/// Indentation for every answer line.
const INDENT: &str = "   ";

/// Print one answered question.
///
/// ```text
///
/// 9) Which city has the best customers?
///    A: Prague with an invoice total of $273.24
/// ```
pub fn write_answer<W: Write>(out: &mut W, spec: &QuerySpec, answer: &Answer) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}) {}", spec.number, spec.question)?;

    match answer {
        Answer::Single(text) => writeln!(out, "{INDENT}A: {text}")?,
        Answer::List {
            legend,
            lines,
            ellipsis,
        } => {
            match legend {
                Some(legend) => writeln!(out, "{INDENT}A: {legend}")?,
                None => writeln!(out, "{INDENT}A:")?,
            }
            for line in lines {
                writeln!(out, "{INDENT}{line}")?;
            }
            if *ellipsis {
                writeln!(out, "{INDENT}...")?;
            }
        }
    }

    Ok(())
}

/// Run every question in `queries` in order and print each answer to `out`.
pub async fn answer_all<W: Write>(
    conn: &mut PgConnection,
    queries: &[QuerySpec],
    out: &mut W,
) -> Result<(), AnalysisError> {
    for spec in queries {
        let rows = run_query(conn, spec).await?;
        let answer = spec.answer(&rows)?;
        write_answer(out, spec, &answer)?;
    }
    out.flush()?;

    info!(questions = queries.len(), "All questions answered");
    Ok(())
}
