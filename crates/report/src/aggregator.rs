use anyhow::Result;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::{QuestionCatalog, QuestionEntry, Scenario, Strategy};
use extract::{Extraction, parse_numeric_value};
use query::AnswerRetriever;

pub const VALUE_NOT_FOUND: &str = "Value not found";

/// One scenario column of a result row.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Cell {
    Value(f64),
    #[default]
    NotFound,
}

impl Cell {
    /// Zero is indistinguishable from a failed extraction, so it is stored as `NotFound`.
    pub fn from_value(value: f64) -> Self {
        if value == 0.0 || !value.is_finite() {
            Cell::NotFound
        } else {
            Cell::Value(value)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Cell::Value(v) => Some(*v),
            Cell::NotFound => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Value(v) if v.fract() == 0.0 && v.abs() < 1e15 => write!(f, "{:.0}", v),
            Cell::Value(v) => write!(f, "{}", v),
            Cell::NotFound => f.write_str(VALUE_NOT_FOUND),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Value(v) => serializer.serialize_f64(*v),
            Cell::NotFound => serializer.serialize_str(VALUE_NOT_FOUND),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub component: String,
    pub no_action: Cell,
    pub with_action: Cell,
    pub units: String,
}

impl ResultRow {
    fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            no_action: Cell::NotFound,
            with_action: Cell::NotFound,
            units: String::new(),
        }
    }

    pub fn cell(&self, scenario: Scenario) -> Cell {
        match scenario {
            Scenario::NoAction => self.no_action,
            Scenario::WithAction => self.with_action,
        }
    }
}

/// Result rows keyed by component. Iteration is sorted by component name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportTable {
    rows: BTreeMap<String, ResultRow>,
}

impl ReportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one extracted value under `scenario` for `component`.
    ///
    /// The units field is written only while it is still empty.
    pub fn record_answer(&mut self, component: &str, scenario: Scenario, value: f64, unit: Option<&str>) {
        let row = self
            .rows
            .entry(component.to_string())
            .or_insert_with(|| ResultRow::new(component));

        let cell = Cell::from_value(value);
        match scenario {
            Scenario::NoAction => row.no_action = cell,
            Scenario::WithAction => row.with_action = cell,
        }

        if row.units.is_empty() {
            row.units = unit.unwrap_or_default().to_string();
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.values()
    }

    pub fn get(&self, component: &str) -> Option<&ResultRow> {
        self.rows.get(component)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Serialize for ReportTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows.values())
    }
}

pub const HEADERS: [&str; 4] = ["Component", "No Action", "With Action", "Units"];

impl fmt::Display for ReportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<[String; 4]> = self
            .rows()
            .map(|row| {
                [
                    row.component.clone(),
                    row.no_action.to_string(),
                    row.with_action.to_string(),
                    row.units.clone(),
                ]
            })
            .collect();

        let mut widths = HEADERS.map(|h| h.chars().count());
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let header = HEADERS.map(String::from);
        for line in std::iter::once(&header).chain(cells.iter()) {
            let padded: Vec<String> = line
                .iter()
                .zip(widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect();
            writeln!(f, "{}", padded.join("  ").trim_end())?;
        }
        Ok(())
    }
}

/// What happened to one question, for the answer log.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerRecord {
    pub category: String,
    pub component: String,
    pub scenario: Scenario,
    pub strategy: Strategy,
    pub question: String,
    pub response: Option<String>,
    pub pages: Vec<String>,
    pub extraction: Option<Extraction>,
    pub error: Option<String>,
}

impl AnswerRecord {
    pub fn found(&self) -> bool {
        self.extraction
            .as_ref()
            .and_then(Extraction::found)
            .is_some_and(|v| v != 0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub table: ReportTable,
    pub answers: Vec<AnswerRecord>,
}

impl Report {
    pub fn values_found(&self) -> usize {
        self.answers.iter().filter(|a| a.found()).count()
    }

    pub fn service_failures(&self) -> usize {
        self.answers.iter().filter(|a| a.error.is_some()).count()
    }
}

/// Ask every catalog question, in catalog order, and collect the answers.
///
/// A question whose retrieval fails transiently is recorded as not found.
/// A fatal service failure stops the report and is returned.
pub async fn build_report(catalog: &QuestionCatalog, retriever: &AnswerRetriever) -> Result<Report> {
    let mut report = Report::default();

    for entry in catalog.entries() {
        let unit = catalog.unit_for(&entry.component);

        let record = match retriever.answer(&entry.question).await {
            Ok(result) => {
                let extraction = extract_value(entry.strategy, &result.answer, &entry.component);

                tracing::debug!(
                    component = %entry.component,
                    question = %entry.question,
                    context = %preview(&result.context, 500),
                    response = %result.answer,
                    "Model answered"
                );
                match &extraction {
                    Extraction::Found(value) => tracing::info!(
                        component = %entry.component,
                        scenario = %entry.scenario,
                        strategy = %entry.strategy,
                        pages = ?result.pages,
                        value,
                        "Extracted value"
                    ),
                    Extraction::NotFound(reason) | Extraction::ParseError(reason) => tracing::warn!(
                        component = %entry.component,
                        scenario = %entry.scenario,
                        strategy = %entry.strategy,
                        pages = ?result.pages,
                        reason = %reason,
                        response = %result.answer,
                        "Failed to extract numeric value"
                    ),
                }

                report
                    .table
                    .record_answer(&entry.component, entry.scenario, extraction.value(), unit);
                answer_record(entry, Some(result.answer), result.pages, Some(extraction), None)
            }
            Err(e) if index::is_fatal(&e) => {
                tracing::error!(component = %entry.component, error = %e, "Fatal service failure");
                return Err(e.context(format!("Question for {} ({}) failed", entry.component, entry.scenario)));
            }
            Err(e) => {
                tracing::warn!(
                    component = %entry.component,
                    scenario = %entry.scenario,
                    error = %format!("{:#}", e),
                    "Question failed, recording value as not found"
                );
                report.table.record_answer(&entry.component, entry.scenario, 0.0, unit);
                answer_record(entry, None, Vec::new(), None, Some(format!("{:#}", e)))
            }
        };

        report.answers.push(record);
    }

    Ok(report)
}

/// Both strategies currently share one extraction rule set.
fn extract_value(strategy: Strategy, text: &str, component: &str) -> Extraction {
    match strategy {
        Strategy::Fusion | Strategy::Single => parse_numeric_value(text, component),
    }
}

fn answer_record(
    entry: &QuestionEntry,
    response: Option<String>,
    pages: Vec<String>,
    extraction: Option<Extraction>,
    error: Option<String>,
) -> AnswerRecord {
    AnswerRecord {
        category: entry.category.clone(),
        component: entry.component.clone(),
        scenario: entry.scenario,
        strategy: entry.strategy,
        question: entry.question.clone(),
        response,
        pages,
        extraction,
        error,
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
