//! Run summary rendering: a boxed table for terminals and JSON for tooling.

use crate::{
    orchestrator::{CaseStatus, RunSummary, TestCaseRecord},
    Result,
};

const NAME_WIDTH: usize = 36;
const STATUS_WIDTH: usize = 7;
const TIME_WIDTH: usize = 9;
const DETAIL_WIDTH: usize = 40;

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

const fn icon(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::Pass => "✓",
        CaseStatus::Fail => "✗",
        CaseStatus::Error => "!",
        CaseStatus::Pending => "○",
    }
}

fn detail(record: &TestCaseRecord) -> String {
    match (&record.error_message, &record.note) {
        (Some(message), _) => match record.failure_kind {
            Some(kind) => format!("{kind}: {message}"),
            None => message.clone(),
        },
        (None, Some(note)) => note.clone(),
        (None, None) => String::new(),
    }
}

/// Render the summary as a box-drawing table with totals and success rate.
pub fn render_table(summary: &RunSummary) -> String {
    let inner = NAME_WIDTH + STATUS_WIDTH + TIME_WIDTH + DETAIL_WIDTH + 11;
    let rule = "═".repeat(inner);
    let row = |name: &str, status: &str, time: &str, detail: &str| {
        format!(
            "║ {:<NAME_WIDTH$} │ {:<STATUS_WIDTH$} │ {:>TIME_WIDTH$} │ {:<DETAIL_WIDTH$} ║",
            truncate(name, NAME_WIDTH),
            truncate(status, STATUS_WIDTH),
            time,
            truncate(detail, DETAIL_WIDTH),
        )
    };
    let banner = |text: &str| {
        format!("║ {:<width$} ║", truncate(text, inner - 2), width = inner - 2)
    };

    let mut lines = vec![
        format!("╔{rule}╗"),
        banner("CRUDPROBE RESULTS"),
        format!("╠{rule}╣"),
        row("Case", "Status", "Time", "Detail"),
        format!("╠{rule}╣"),
    ];
    lines.extend(summary.records.iter().map(|record| {
        row(
            &record.name,
            &format!("{} {}", icon(record.status), record.status),
            &format!("{}ms", record.duration_ms),
            &detail(record),
        )
    }));

    let totals = format!(
        "{} total, {} passed, {} failed ({} errored), success rate {:.1}%",
        summary.total,
        summary.passed.len(),
        summary.failed.len(),
        summary.errored(),
        summary.success_rate() * 100.0
    );
    lines.push(format!("╠{rule}╣"));
    lines.push(banner(&totals));
    lines.push(format!("╚{rule}╝"));

    let artifacts: Vec<_> = summary
        .records
        .iter()
        .filter_map(|r| r.artifact.as_ref().map(|path| format!("  {}: {}", r.name, path.display())))
        .collect();
    if !artifacts.is_empty() {
        lines.push(String::new());
        lines.push("Artifacts:".to_string());
        lines.extend(artifacts);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Pretty JSON form of the summary.
pub fn render_json(summary: &RunSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::orchestrator::FailureKind;

    fn record(name: &str, status: CaseStatus) -> TestCaseRecord {
        TestCaseRecord {
            name: name.to_string(),
            status,
            duration_ms: 12,
            error_message: (status != CaseStatus::Pass).then(|| "visible in farm-b".to_string()),
            failure_kind: (status == CaseStatus::Fail).then_some(FailureKind::IsolationViolation),
            note: None,
            attempts: 1,
            artifact: None,
        }
    }

    fn summary() -> RunSummary {
        let now = Utc::now();
        RunSummary {
            passed: vec!["crud:crop".to_string()],
            failed: vec!["isolation:crop".to_string()],
            total: 2,
            started_at: now,
            ended_at: now,
            records: vec![
                record("crud:crop", CaseStatus::Pass),
                record("isolation:crop", CaseStatus::Fail),
            ],
        }
    }

    #[test]
    fn test_table_lists_every_case_and_rate() {
        let table = render_table(&summary());
        assert!(table.contains("crud:crop"));
        assert!(table.contains("✗ fail"));
        assert!(table.contains("isolation_violation: visible in farm-b"));
        assert!(table.contains("success rate 50.0%"));
    }

    #[test]
    fn test_table_rows_align() {
        let table = render_table(&summary());
        let widths: Vec<_> = table
            .lines()
            .filter(|l| l.starts_with('║') || l.starts_with('╔'))
            .map(|l| l.chars().count())
            .collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]), "{widths:?}");
    }

    #[test]
    fn test_json_contains_records() -> Result<()> {
        let json: serde_json::Value = serde_json::from_str(&render_json(&summary())?)?;
        assert_eq!(json["total"], 2);
        assert_eq!(json["records"][1]["status"], "fail");
        assert_eq!(json["records"][1]["failure_kind"], "isolation_violation");
        Ok(())
    }

    #[test]
    fn test_artifacts_listed_after_table() {
        let mut summary = summary();
        summary.records[1].artifact = Some("artifacts/isolation-crop-1.json".into());
        let table = render_table(&summary);
        let tail: Vec<_> = table.lines().skip_while(|l| !l.starts_with('╚')).collect();
        assert_eq!(
            tail,
            vec![
                tail[0],
                "",
                "Artifacts:",
                "  isolation:crop: artifacts/isolation-crop-1.json",
            ]
        );
        assert!(table.ends_with('\n'));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
