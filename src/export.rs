use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::pipeline::{Outcome, PageVerdict};
use crate::segment::{IssueRange, StructureRecord};

/// Replace the manifest's `structures` with `records`.
///
/// With no records the field is removed entirely rather than left as `[]`.
pub fn with_structures(mut document: Value, records: &[StructureRecord]) -> Result<Value> {
    let object = document
        .as_object_mut()
        .ok_or_else(|| Error::Manifest("top level is not a JSON object".into()))?;

    if records.is_empty() {
        object.remove("structures");
    } else {
        object.insert("structures".to_string(), serde_json::to_value(records)?);
    }
    Ok(document)
}

pub fn write_manifest(path: &Path, document: &Value) -> Result<()> {
    write_pretty(path, document)?;
    info!("Manifest saved to {}", path.display());
    Ok(())
}

/// One `start_id,end_id` line per issue.
pub fn ranges_text(ranges: &[IssueRange]) -> String {
    ranges
        .iter()
        .map(|r| format!("{},{}\n", r.start_id, r.end_id))
        .collect()
}

/// Write the ranges list. Returns `false` without touching the
/// filesystem when there are no ranges.
pub fn write_ranges(path: &Path, ranges: &[IssueRange]) -> Result<bool> {
    if ranges.is_empty() {
        info!("No issue ranges; {} not written", path.display());
        return Ok(false);
    }
    fs::write(path, ranges_text(ranges))?;
    info!("Wrote {} ranges to {}", ranges.len(), path.display());
    Ok(true)
}

#[derive(Serialize)]
struct ReportRow<'a> {
    page: usize,
    id: Option<&'a str>,
    canvas_id: Option<&'a str>,
    is_cover: bool,
    confidence: f32,
    outcome: &'a Outcome,
}

/// Per-page verdicts as a JSON array.
pub fn write_report(path: &Path, verdicts: &[PageVerdict]) -> Result<()> {
    let rows: Vec<ReportRow> = verdicts
        .iter()
        .map(|v| ReportRow {
            page: v.page.index,
            id: v.page.id.as_deref(),
            canvas_id: v.page.canvas_id.as_deref(),
            is_cover: v.is_cover,
            confidence: v.confidence,
            outcome: &v.outcome,
        })
        .collect();
    write_pretty(path, &rows)?;
    info!("Verdict report saved to {}", path.display());
    Ok(())
}

fn write_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    buf.push(b'\n');
    fs::write(path, buf)?;
    Ok(())
}
