use std::fmt::Write as _;

use chrono::NaiveDate;
use serde_json::Value;

use dispatch_core::DetailLevel;

use super::{AgencyReport, RawContext};
use crate::truncate::truncate_with_marker;

/// Byte budget for the rendered context at each detail level.
pub fn budget_for(level: DetailLevel) -> usize {
    match level {
        DetailLevel::Summary => 1_500,
        DetailLevel::Standard => 4_000,
        DetailLevel::Full => 12_000,
    }
}

/// Metrics shown per report at the summary level.
const SUMMARY_METRICS: usize = 3;

/// Render `raw` for the system prompt. Reports relevant to `page` come
/// first; the result never exceeds the level's budget.
pub fn compress(raw: &RawContext, page: &str, level: DetailLevel) -> String {
    let mut out = header(raw.date, page);
    if raw.is_degraded() {
        let _ = writeln!(
            out,
            "Note: data from {} is currently unavailable.",
            raw.degraded.join(", ")
        );
    }

    let mut ordered: Vec<&AgencyReport> = raw.reports.iter().collect();
    // stable: equal relevance keeps source order
    ordered.sort_by_key(|r| !r.is_relevant_to(page));

    for report in ordered {
        out.push('\n');
        render_report(&mut out, report, level);
    }

    truncate_with_marker(out.trim_end(), budget_for(level))
}

/// Minimal context used when assembly failed outright.
pub fn fallback_context(date: NaiveDate, page: &str) -> String {
    let mut out = header(date, page);
    out.push_str(
        "Note: system data is partially unavailable right now. Answer from what \
         the user has said, and say so when a specific figure is needed.",
    );
    out
}

fn header(date: NaiveDate, page: &str) -> String {
    let page = if page.trim().is_empty() { "/" } else { page.trim() };
    format!("Date: {date}\nCurrent page: {page}\n")
}

fn render_report(out: &mut String, report: &AgencyReport, level: DetailLevel) {
    let _ = writeln!(out, "## {}", report.agency);
    let summary = report.summary.trim();
    if !summary.is_empty() {
        match level {
            DetailLevel::Summary => {
                let _ = writeln!(out, "{}", first_sentence(summary));
            }
            _ => {
                let _ = writeln!(out, "{summary}");
            }
        }
    }

    let limit = match level {
        DetailLevel::Summary => SUMMARY_METRICS,
        _ => usize::MAX,
    };
    for (name, value) in report.metrics.iter().take(limit) {
        let _ = writeln!(out, "- {name}: {}", render_value(value));
    }

    if level == DetailLevel::Full {
        for detail in report.details.iter().filter(|d| !d.trim().is_empty()) {
            let _ = writeln!(out, "* {}", detail.trim());
        }
    }
}

fn first_sentence(text: &str) -> &str {
    match text.find(". ") {
        Some(pos) => &text[..=pos],
        None => text,
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
