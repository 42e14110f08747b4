//! Renderers for probe results and watch summaries.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::NaiveTime;
use clap::ValueEnum;
use serde::Serialize;

use crate::probe::{CertificateInfo, ProbeResult};
use crate::scheduler::WatchSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
    Minimal,
}

/// Render a batch of results in `format`.
pub fn render(results: &[ProbeResult], format: OutputFormat) -> Result<String, serde_json::Error> {
    Ok(match format {
        OutputFormat::Table => render_table(results),
        OutputFormat::Json => render_json(results)?,
        OutputFormat::Csv => render_csv(results),
        OutputFormat::Minimal => render_minimal(results),
    })
}

/// `✓` success, `!` the server answered but was not accepted, `✗` error.
pub fn status_marker(result: &ProbeResult) -> &'static str {
    if result.success {
        "✓"
    } else if result.error.is_none() {
        "!"
    } else {
        "✗"
    }
}

fn note(result: &ProbeResult) -> String {
    if let Some(e) = &result.error {
        return e.to_string();
    }
    if result.attempt > 0 {
        return format!("{} retries", result.attempt);
    }
    result.size.map(format_bytes).unwrap_or_default()
}

pub fn render_table(results: &[ProbeResult]) -> String {
    let rows: Vec<[String; 5]> = results
        .iter()
        .map(|r| {
            [
                status_marker(r).to_string(),
                r.target.clone(),
                r.code_or_info().unwrap_or_else(|| "-".to_string()),
                format_ms(r.duration),
                note(r),
            ]
        })
        .collect();
    table(["Status", "Target", "Code/Info", "Time", "Note"], &rows)
}

/// Left-aligned columns separated by two spaces.
fn table<const N: usize>(header: [&str; N], rows: &[[String; N]]) -> String {
    let mut widths = header.map(|h| h.chars().count());
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &header, &widths);
    let rule = widths.map(|w| "-".repeat(w));
    push_row(&mut out, &rule, &widths);
    for row in rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row<S: AsRef<str>>(out: &mut String, cells: &[S], widths: &[usize]) {
    let mut line = String::new();
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if i > 0 {
            line.push_str("  ");
        }
        write!(line, "{:<width$}", cell.as_ref(), width = *width).ok();
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    target: &'a str,
    success: bool,
    status_code: Option<u16>,
    info: Option<&'a str>,
    duration_ms: u64,
    size: Option<u64>,
    attempt: u32,
    error: Option<String>,
    certificate: Option<&'a CertificateInfo>,
}

impl<'a> From<&'a ProbeResult> for JsonRecord<'a> {
    fn from(r: &'a ProbeResult) -> Self {
        Self {
            target: &r.target,
            success: r.success,
            status_code: r.status_code,
            info: r.info.as_deref(),
            duration_ms: r.duration.as_millis() as u64,
            size: r.size,
            attempt: r.attempt,
            error: r.error.as_ref().map(|e| e.to_string()),
            certificate: r.certificate.as_ref(),
        }
    }
}

pub fn render_json(results: &[ProbeResult]) -> Result<String, serde_json::Error> {
    let records: Vec<JsonRecord> = results.iter().map(JsonRecord::from).collect();
    let mut json = serde_json::to_string_pretty(&records)?;
    json.push('\n');
    Ok(json)
}

pub fn render_csv(results: &[ProbeResult]) -> String {
    let mut out = String::from("target,info,duration_ms,size,success,error\n");
    for r in results {
        let fields = [
            r.target.clone(),
            r.code_or_info().unwrap_or_default(),
            r.duration.as_millis().to_string(),
            r.size.map(|s| s.to_string()).unwrap_or_default(),
            r.success.to_string(),
            r.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
        ];
        let quoted: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&quoted.join(","));
        out.push('\n');
    }
    out
}

/// Quote a CSV field when it contains a delimiter, quote, or line break.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn render_minimal(results: &[ProbeResult]) -> String {
    let mut out = String::new();
    for r in results {
        let line = match (&r.error, r.code_or_info()) {
            (None, Some(info)) => format!("{} {}\n", info, r.target),
            _ => format!("ERR {}\n", r.target),
        };
        out.push_str(&line);
    }
    out
}

/// One watch-mode line, stamped with the local wall-clock time.
pub fn watch_line(result: &ProbeResult, at: NaiveTime) -> String {
    let stamp = at.format("%H:%M:%S");
    if result.success {
        format!(
            "[{}] ✓ {} - {} {}",
            stamp,
            result.target,
            result.code_or_info().unwrap_or_else(|| "ok".to_string()),
            format_ms(result.duration)
        )
    } else {
        let reason = match (&result.error, result.status_code) {
            (Some(e), _) => e.to_string(),
            (None, Some(code)) => format!("status {}", code),
            (None, None) => result.info.clone().unwrap_or_else(|| "failed".to_string()),
        };
        format!("[{}] ✗ {} - {}", stamp, result.target, reason)
    }
}

pub fn render_summary(summary: &WatchSummary) -> String {
    let rows: Vec<[String; 9]> = summary
        .targets
        .iter()
        .map(|s| {
            [
                s.target.clone(),
                s.checks.to_string(),
                s.successes.to_string(),
                s.failures.to_string(),
                format!("{:.1}%", s.uptime),
                format_ms(s.avg),
                format_ms(s.min),
                format_ms(s.max),
                format_ms(s.p95),
            ]
        })
        .collect();

    let mut out = format!("Summary after {} cycles\n", summary.cycles);
    out.push_str(&table(
        ["Target", "Checks", "Success", "Failed", "Uptime", "Avg", "Min", "Max", "P95"],
        &rows,
    ));
    out
}

pub fn format_ms(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

/// Human-readable byte count using 1024-based units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeError;
    use crate::scheduler::TargetSummary;

    fn ok(target: &str, code: u16, ms: u64, size: u64) -> ProbeResult {
        ProbeResult {
            success: true,
            status_code: Some(code),
            duration: Duration::from_millis(ms),
            size: Some(size),
            ..ProbeResult::new(target)
        }
    }

    fn refused(target: &str) -> ProbeResult {
        ProbeResult::failed(
            target,
            ProbeError::Connect("connection refused".to_string()),
            Duration::from_millis(2),
        )
    }

    #[test]
    fn test_status_markers() {
        assert_eq!(status_marker(&ok("a", 200, 1, 0)), "✓");
        let rejected = ProbeResult {
            status_code: Some(503),
            ..ProbeResult::new("a")
        };
        assert_eq!(status_marker(&rejected), "!");
        assert_eq!(status_marker(&refused("a")), "✗");
    }

    #[test]
    fn test_table_layout() {
        let results = vec![ok("https://example.com", 200, 120, 2048), refused("tcp://db:5432")];
        let table = render_table(&results);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Status"));
        assert!(lines[1].starts_with("------"));
        assert!(lines[2].contains("https://example.com"));
        assert!(lines[2].contains("200"));
        assert!(lines[2].contains("120ms"));
        assert!(lines[2].ends_with("2.0 KB"));
        assert!(lines[3].starts_with("✗"));
        assert!(lines[3].contains("connection failed: connection refused"));

        // Targets start in the same column on every row.
        let col = |line: &str, needle: &str| {
            let byte = line.find(needle).unwrap();
            line[..byte].chars().count()
        };
        assert_eq!(col(lines[2], "https://"), col(lines[3], "tcp://"));
    }

    #[test]
    fn test_table_note_shows_retries() {
        let retried = ProbeResult {
            attempt: 2,
            ..ok("https://example.com", 200, 10, 10)
        };
        assert!(render_table(&[retried]).lines().nth(2).unwrap().ends_with("2 retries"));
    }

    #[test]
    fn test_json_records() {
        let results = vec![ok("https://example.com", 200, 15, 512), refused("tcp://db:5432")];
        let json: serde_json::Value = serde_json::from_str(&render_json(&results).unwrap()).unwrap();

        assert_eq!(json[0]["target"], "https://example.com");
        assert_eq!(json[0]["success"], true);
        assert_eq!(json[0]["status_code"], 200);
        assert_eq!(json[0]["duration_ms"], 15);
        assert_eq!(json[0]["size"], 512);
        assert!(json[0]["error"].is_null());
        assert!(json[0]["certificate"].is_null());
        assert_eq!(json[1]["success"], false);
        assert_eq!(json[1]["error"], "connection failed: connection refused");
    }

    #[test]
    fn test_csv_header_and_quoting() {
        let results = vec![
            ok("https://example.com/?a=1,b=2", 200, 7, 3),
            ProbeResult::failed(
                "http://x",
                ProbeError::Transport("bad \"gateway\"".to_string()),
                Duration::from_millis(1),
            ),
        ];
        let csv = render_csv(&results);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "target,info,duration_ms,size,success,error");
        assert_eq!(lines[1], "\"https://example.com/?a=1,b=2\",200,7,3,true,");
        assert_eq!(lines[2], "http://x,,1,,false,\"request failed: bad \"\"gateway\"\"\"");
    }

    #[test]
    fn test_minimal() {
        let tcp = ProbeResult {
            success: true,
            info: Some("Open".to_string()),
            ..ProbeResult::new("tcp://db:5432")
        };
        let out = render_minimal(&[ok("https://a", 204, 1, 0), tcp, refused("tcp://down:1")]);
        assert_eq!(out, "204 https://a\nOpen tcp://db:5432\nERR tcp://down:1\n");
    }

    #[test]
    fn test_watch_lines() {
        let at = NaiveTime::from_hms_opt(9, 5, 3).unwrap();
        assert_eq!(
            watch_line(&ok("https://a", 200, 42, 0), at),
            "[09:05:03] ✓ https://a - 200 42ms"
        );

        let rejected = ProbeResult {
            status_code: Some(503),
            ..ProbeResult::new("https://b")
        };
        assert_eq!(watch_line(&rejected, at), "[09:05:03] ✗ https://b - status 503");
        assert_eq!(
            watch_line(&refused("tcp://c:1"), at),
            "[09:05:03] ✗ tcp://c:1 - connection failed: connection refused"
        );
    }

    #[test]
    fn test_summary_table() {
        let summary = WatchSummary {
            cycles: 4,
            targets: vec![TargetSummary {
                target: "https://a".to_string(),
                checks: 4,
                successes: 3,
                failures: 1,
                uptime: 75.0,
                avg: Duration::from_millis(25),
                min: Duration::from_millis(10),
                max: Duration::from_millis(40),
                p50: Duration::from_millis(22),
                p95: Duration::from_millis(39),
                p99: Duration::from_millis(40),
            }],
        };
        let out = render_summary(&summary);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Summary after 4 cycles");
        assert!(lines[1].starts_with("Target"));
        assert!(lines[1].ends_with("P95"));
        let cells: Vec<&str> = lines[3].split_whitespace().collect();
        assert_eq!(
            cells,
            vec!["https://a", "4", "3", "1", "75.0%", "25ms", "10ms", "40ms", "39ms"]
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_render_dispatches_on_format() {
        let results = vec![ok("https://a", 200, 1, 0)];
        assert_eq!(render(&results, OutputFormat::Minimal).unwrap(), "200 https://a\n");
        assert!(render(&results, OutputFormat::Csv).unwrap().starts_with("target,"));
        assert!(render(&results, OutputFormat::Json).unwrap().starts_with('['));
    }
}
