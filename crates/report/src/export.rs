use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregator::{AnswerRecord, Cell, HEADERS, ReportTable, VALUE_NOT_FOUND};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xlsx" => Ok(ExportFormat::Xlsx),
            "csv" => Ok(ExportFormat::Csv),
            other => anyhow::bail!("Unknown output format {:?} (expected xlsx or csv)", other),
        }
    }
}

/// `<output_dir>/<name>.<ext>`.
pub fn output_path(output_dir: &Path, name: &str, format: ExportFormat) -> PathBuf {
    output_dir.join(format!("{}.{}", name, format.extension()))
}

/// Report name for a processed directory: its base name.
pub fn report_name(dir: &Path) -> String {
    let resolved;
    let dir = if dir.file_name().is_none() {
        resolved = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        resolved.as_path()
    } else {
        dir
    };

    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string())
}

/// Remove an artifact left over from an earlier run. Failures are logged, not returned.
pub fn cleanup_stale_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "Removed previous output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No previous output to remove");
        }
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove previous output"),
    }
}

/// Write the table to `path`, creating parent directories.
pub fn export_table(table: &ReportTable, path: &Path, format: ExportFormat) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }

    match format {
        ExportFormat::Xlsx => write_xlsx(table, path)?,
        ExportFormat::Csv => write_csv(table, path)?,
    }

    tracing::info!(path = %path.display(), rows = table.len(), "Results saved");
    Ok(path.to_path_buf())
}

/// Numeric cells stay numbers; zero and missing values become the sentinel string.
fn sheet_value(cell: Cell) -> Option<f64> {
    cell.value().filter(|v| *v != 0.0)
}

fn write_xlsx(table: &ReportTable, path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Results")?;

    for (col, header) in HEADERS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (i, row) in table.rows().enumerate() {
        let r = (i + 1) as u32;
        worksheet.write_string(r, 0, &row.component)?;
        for (col, cell) in [(1u16, row.no_action), (2u16, row.with_action)] {
            match sheet_value(cell) {
                Some(v) => worksheet.write_number(r, col, v)?,
                None => worksheet.write_string(r, col, VALUE_NOT_FOUND)?,
            };
        }
        worksheet.write_string(r, 3, &row.units)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn write_csv(table: &ReportTable, path: &Path) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(HEADERS)?;
    for row in table.rows() {
        let render = |cell: Cell| match sheet_value(cell) {
            Some(v) => Cell::Value(v).to_string(),
            None => VALUE_NOT_FOUND.to_string(),
        };
        writer.write_record([
            row.component.clone(),
            render(row.no_action),
            render(row.with_action),
            row.units.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Pretty JSON dump of every question asked for one directory.
pub fn write_answers_log(answers: &[AnswerRecord], path: &Path) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(answers).context("Failed to serialise answer log")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), answers = answers.len(), "Answer log saved");
    Ok(path.to_path_buf())
}
