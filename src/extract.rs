//! The report-row extraction boundary.
//!
//! Parsing the transformed report XML into relational rows is, like the
//! transform itself, explicitly out of scope for the coordination core.
//! This module owns only the trait boundary and a minimal default
//! extractor; real deployments inject their own.

use thiserror::Error;

use crate::db::ReportRow;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("report document is not well-formed: {0}")]
    Malformed(String),
}

/// Converts a transformed report document into the structured rows handed
/// to `persist_report`.
pub trait ReportExtractor: Send + Sync {
    fn extract(&self, report_xml: &str) -> Result<Vec<ReportRow>, ExtractError>;
}

/// Minimal extractor sufficient for tests and small deployments: treats
/// each top-level `<row key="...">value</row>` line as one report row
/// with a single `value` field. Real schemas are expected to supply their
/// own extractor.
#[derive(Default)]
pub struct LineReportExtractor;

impl ReportExtractor for LineReportExtractor {
    fn extract(&self, report_xml: &str) -> Result<Vec<ReportRow>, ExtractError> {
        if report_xml.trim().is_empty() {
            return Err(ExtractError::Malformed("empty report document".into()));
        }
        let mut rows = Vec::new();
        for line in report_xml.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut row = ReportRow::new();
            row.insert(
                "line".to_string(),
                serde_json::Value::String(line.to_string()),
            );
            rows.push(row);
        }
        Ok(rows)
    }
}
