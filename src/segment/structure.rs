use serde::Serialize;

use super::ranges::IssueRange;
use crate::manifest::PageDescriptor;

pub const RANGE_TYPE: &str = "sc:Range";

/// One `structures` entry of a IIIF v2 manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureRecord {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: &'static str,
    pub label: String,
    #[serde(rename = "canvases")]
    pub member_ids: Vec<String>,
}

/// Turn issue ranges into `sc:Range` records listing their canvases.
///
/// Record ids follow the position of the range in `ranges`, so a range
/// dropped for having no canvases leaves a gap in the numbering.
pub fn build(
    ranges: &[IssueRange],
    pages: &[PageDescriptor],
    namespace: &str,
) -> Vec<StructureRecord> {
    let namespace = namespace.trim_end_matches('/');

    ranges
        .iter()
        .enumerate()
        .filter_map(|(i, range)| {
            let member_ids: Vec<String> = pages
                .iter()
                .filter(|p| (range.start_index..=range.end_index).contains(&p.index))
                .filter_map(|p| p.canvas_id.clone())
                .collect();
            if member_ids.is_empty() {
                return None;
            }
            Some(StructureRecord {
                id: format!("{}/range/r{}", namespace, i),
                kind: RANGE_TYPE,
                label: format!("Issue starting at page {}", range.start_index),
                member_ids,
            })
        })
        .collect()
}
