use std::fmt::Write as _;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::orchestrator::{AnalysisOutcome, PlanOutcome};
use super::session::{QueryRecord, Session};
use crate::infrastructure::model::ModelProvider;

const PROMPT: &str = "\nResearch query > ";

/// Interactive line loop: one query processed start to finish per line.
/// Per-query failures are printed and the loop keeps going; only I/O errors
/// on the terminal itself end the loop early.
pub async fn run<P: ModelProvider>(session: &mut Session<P>) -> Result<(), io::Error> {
    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    stdout
        .write_all(b"\nResearch console ready. Type 'exit' to quit.\n")
        .await?;

    loop {
        stdout.write_all(PROMPT.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
            break;
        }

        match session.process_query(query).await {
            Ok(record) => {
                debug!(id = %record.id, query = %record.query, "Query processed");
                stdout.write_all(render_record(&record).as_bytes()).await?;
            }
            Err(err) => {
                error!(%err, "Query processing failed");
                let message = format!("\nError processing query: {}\n", err.user_message());
                stdout.write_all(message.as_bytes()).await?;
            }
        }
        stdout.flush().await?;
    }

    session.close();
    let summary = session.summary();
    info!(queries = summary.query_count, "Console loop finished");
    let farewell = format!(
        "\nSession ended. {} quer{} processed.\n",
        summary.query_count,
        if summary.query_count == 1 { "y" } else { "ies" },
    );
    stdout.write_all(farewell.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// Human-facing summary of one query record: findings and recommendations
/// when analysis parsed, the raw model reply when it did not.
pub fn render_record(record: &QueryRecord) -> String {
    let mut out = String::new();

    if let Some(report) = &record.results {
        let _ = writeln!(
            out,
            "\nExecuted {} step(s): {} succeeded, {} failed.",
            report.steps.len(),
            report.metadata.success_count,
            report.metadata.failure_count,
        );
        if report.all_failed() {
            let _ = writeln!(out, "Every step failed; treat the analysis with caution.");
        }
    }

    match (&record.plan, &record.analysis) {
        (PlanOutcome::Invalid { error, raw_response }, _) => {
            let _ = writeln!(out, "\n{error}");
            let _ = writeln!(out, "Raw model reply:\n{raw_response}");
        }
        (_, Some(AnalysisOutcome::Analysis(analysis))) => {
            let _ = writeln!(out, "\nKey findings:");
            if analysis.findings.is_empty() {
                let _ = writeln!(out, "- (none)");
            }
            for finding in &analysis.findings {
                let _ = writeln!(out, "- {finding}");
            }
            let _ = writeln!(out, "\nRecommendations:");
            if analysis.recommendations.is_empty() {
                let _ = writeln!(out, "- (none)");
            }
            for recommendation in &analysis.recommendations {
                let _ = writeln!(out, "- {recommendation}");
            }
        }
        (_, Some(AnalysisOutcome::Invalid { error, raw_response })) => {
            let _ = writeln!(out, "\n{error}");
            let _ = writeln!(out, "Raw model reply:\n{raw_response}");
        }
        (_, None) => {
            let _ = writeln!(out, "\nNo analysis available for results");
        }
    }

    out
}
