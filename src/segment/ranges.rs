use tracing::warn;

use crate::error::{Error, Result};
use crate::manifest::PageDescriptor;

/// Ordered, deduplicated 1-based indices of pages detected as covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverSet(Vec<usize>);

impl CoverSet {
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut covers: Vec<usize> = indices.into_iter().collect();
        covers.sort_unstable();
        covers.dedup();
        Self(covers)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Page bounds of one issue, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start_index: usize,
    pub end_index: usize,
}

/// An issue span whose endpoints resolved to stable page identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRange {
    pub start_index: usize,
    pub end_index: usize,
    pub start_id: String,
    pub end_id: String,
}

/// Partition pages into issue spans, one per cover.
///
/// Each span runs from its cover to the page before the next cover; the last
/// one runs to `total_pages`. Pages before the first cover belong to no span.
/// No covers means no spans.
pub fn segment(
    analyzed_start: usize,
    analyzed_end: usize,
    total_pages: usize,
    covers: &CoverSet,
) -> Result<Vec<Span>> {
    if analyzed_start < 1 || analyzed_start > analyzed_end || analyzed_end > total_pages {
        return Err(Error::InvalidRange {
            start: analyzed_start,
            end: analyzed_end,
            total: total_pages,
        });
    }
    if let Some(&index) = covers
        .as_slice()
        .iter()
        .find(|&&c| c < analyzed_start || c > analyzed_end)
    {
        return Err(Error::CoverOutOfRange {
            index,
            start: analyzed_start,
            end: analyzed_end,
        });
    }

    let starts = covers.as_slice();
    let spans = starts
        .iter()
        .enumerate()
        .map(|(i, &start_index)| {
            let end_index = match starts.get(i + 1) {
                Some(&next) => next - 1,
                None => total_pages,
            };
            Span {
                start_index,
                end_index: end_index.max(start_index),
            }
        })
        .collect();

    Ok(spans)
}

/// Attach stable identifiers to each span's endpoints.
///
/// `pages` must be sorted by index. Spans with an endpoint lacking an
/// identifier are dropped and logged.
pub fn resolve(spans: &[Span], pages: &[PageDescriptor]) -> Vec<IssueRange> {
    spans
        .iter()
        .filter_map(|span| match resolve_span(span, pages) {
            Ok(range) => Some(range),
            Err(e) => {
                warn!(
                    "Dropping issue {}-{}: {}",
                    span.start_index, span.end_index, e
                );
                None
            }
        })
        .collect()
}

fn resolve_span(span: &Span, pages: &[PageDescriptor]) -> Result<IssueRange> {
    Ok(IssueRange {
        start_index: span.start_index,
        end_index: span.end_index,
        start_id: stable_id(pages, span.start_index)?,
        end_id: stable_id(pages, span.end_index)?,
    })
}

fn stable_id(pages: &[PageDescriptor], index: usize) -> Result<String> {
    pages
        .binary_search_by_key(&index, |p| p.index)
        .ok()
        .and_then(|pos| pages[pos].id.clone())
        .ok_or(Error::UnresolvableIdentifier { index })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(spans: &[Span]) -> Vec<(usize, usize)> {
        spans.iter().map(|s| (s.start_index, s.end_index)).collect()
    }

    fn pages(n: usize) -> Vec<PageDescriptor> {
        (1..=n)
            .map(|i| PageDescriptor {
                index: i,
                id: Some(format!("p{}", i)),
                canvas_id: Some(format!("c{}", i)),
                image_locator: None,
            })
            .collect()
    }

    #[test]
    fn no_covers_no_ranges() {
        assert!(segment(1, 10, 10, &CoverSet::default()).unwrap().is_empty());
    }

    #[test]
    fn single_cover_runs_to_last_page() {
        let spans = segment(1, 10, 10, &CoverSet::new([3])).unwrap();
        assert_eq!(bounds(&spans), vec![(3, 10)]);
    }

    #[test]
    fn consecutive_covers_split_ranges() {
        let spans = segment(1, 10, 10, &CoverSet::new([3, 7])).unwrap();
        assert_eq!(bounds(&spans), vec![(3, 6), (7, 10)]);
    }

    #[test]
    fn last_range_extends_past_analyzed_end() {
        let spans = segment(2, 5, 12, &CoverSet::new([2, 4])).unwrap();
        assert_eq!(bounds(&spans), vec![(2, 3), (4, 12)]);
    }

    #[test]
    fn adjacent_covers_give_single_page_issues() {
        let spans = segment(1, 6, 6, &CoverSet::new([4, 5, 6])).unwrap();
        assert_eq!(bounds(&spans), vec![(4, 4), (5, 5), (6, 6)]);
    }

    #[test]
    fn duplicates_and_order_are_normalized() {
        let covers = CoverSet::new([7, 3, 7, 3]);
        assert_eq!(covers.as_slice(), &[3, 7]);
        let spans = segment(1, 10, 10, &covers).unwrap();
        assert_eq!(bounds(&spans), vec![(3, 6), (7, 10)]);
    }

    #[test]
    fn ranges_are_contiguous_and_repeatable() {
        let covers = CoverSet::new([2, 5, 6, 11, 19]);
        let first = segment(1, 20, 25, &covers).unwrap();
        let second = segment(1, 20, 25, &covers).unwrap();
        assert_eq!(first, second);
        for pair in first.windows(2) {
            assert!(pair[0].start_index <= pair[0].end_index);
            assert_eq!(pair[0].end_index + 1, pair[1].start_index);
        }
        assert_eq!(first.last().map(|s| s.end_index), Some(25));
    }

    #[test]
    fn rejects_bad_bounds() {
        let none = CoverSet::default();
        assert!(matches!(segment(0, 5, 10, &none), Err(Error::InvalidRange { .. })));
        assert!(matches!(segment(6, 5, 10, &none), Err(Error::InvalidRange { .. })));
        assert!(matches!(segment(1, 11, 10, &none), Err(Error::InvalidRange { .. })));
        assert!(matches!(
            segment(3, 5, 10, &CoverSet::new([2])),
            Err(Error::CoverOutOfRange { index: 2, .. })
        ));
    }

    #[test]
    fn resolves_endpoint_ids() {
        let spans = segment(1, 10, 10, &CoverSet::new([3, 7])).unwrap();
        let ranges = resolve(&spans, &pages(10));
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].start_id, "p3");
        assert_eq!(ranges[0].end_id, "p6");
        assert_eq!(ranges[1].start_id, "p7");
        assert_eq!(ranges[1].end_id, "p10");
    }

    #[test]
    fn unresolvable_endpoint_drops_range() {
        let mut all = pages(10);
        all[5].id = None; // page 6 ends the first issue
        let spans = segment(1, 10, 10, &CoverSet::new([3, 7])).unwrap();
        let ranges = resolve(&spans, &all);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start_index, 7);
    }
}
