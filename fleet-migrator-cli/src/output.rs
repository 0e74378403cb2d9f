//! Report rendering for stdout.

use std::fmt::Write as _;

use clap::ValueEnum;

use fleet_migrator_core::types::{FleetReport, MigrationResult, MigrationStatus, ScriptVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Aligned columns for humans
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn status_label(status: MigrationStatus) -> &'static str {
    match status {
        MigrationStatus::Success => "success",
        MigrationStatus::Skipped => "skipped",
        MigrationStatus::Failed => "failed",
    }
}

fn versions_cell(versions: impl Iterator<Item = i64>) -> String {
    let versions: Vec<String> = versions.map(|v| v.to_string()).collect();
    if versions.is_empty() {
        "-".to_string()
    } else {
        versions.join(",")
    }
}

fn detail_cell(result: &MigrationResult) -> String {
    result
        .detail
        .as_ref()
        .map_or_else(String::new, |d| format!("{}: {}", d.code, d.message))
}

pub fn render_report(report: &FleetReport, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(report)?);
    }

    let rows: Vec<[String; 4]> = report
        .results
        .iter()
        .map(|r| {
            let versions = if report.dry_run {
                versions_cell(r.pending.iter().map(|p| p.version))
            } else {
                versions_cell(r.applied.iter().map(|a| a.version))
            };
            [
                r.tenant_id.clone(),
                status_label(r.status).to_string(),
                versions,
                detail_cell(r),
            ]
        })
        .collect();

    let header = [
        "TENANT",
        "STATUS",
        if report.dry_run { "PENDING" } else { "APPLIED" },
        "DETAIL",
    ];
    let mut out = render_table(&header, &rows);

    let s = &report.summary;
    let scripts = if report.dry_run {
        report.results.iter().map(|r| r.pending.len()).sum()
    } else {
        s.scripts_applied
    };
    let _ = writeln!(
        out,
        "\n{} {} target(s): {} succeeded, {} skipped, {} failed, {} script(s) {} in {}ms",
        report.domain,
        s.total,
        s.succeeded,
        s.skipped,
        s.failed,
        scripts,
        if report.dry_run { "pending" } else { "applied" },
        s.elapsed_ms
    );
    Ok(out)
}

pub fn render_scripts(scripts: &[ScriptVersion], format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        let entries: Vec<serde_json::Value> = scripts
            .iter()
            .map(|s| {
                serde_json::json!({
                    "version": s.version,
                    "name": s.name,
                    "domain": s.domain,
                    "checksum": s.checksum(),
                })
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&entries)?);
    }

    let rows: Vec<[String; 3]> = scripts
        .iter()
        .map(|s| [s.version.to_string(), s.name.clone(), s.checksum()])
        .collect();
    let mut out = render_table(&["VERSION", "NAME", "CHECKSUM"], &rows);
    let _ = writeln!(out, "\n{} script(s)", scripts.len());
    Ok(out)
}

fn render_table<const N: usize>(header: &[&str; N], rows: &[[String; N]]) -> String {
    let mut widths = header.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut write_row = |cells: [&str; N]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    };

    write_row(*header);
    for row in rows {
        write_row(std::array::from_fn(|i| row[i].as_str()));
    }
    out
}
