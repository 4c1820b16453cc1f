use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::ProgressBar;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::classifier::{Classification, Classifier};
use crate::error::{Error, Result};
use crate::fetch::ImageFetcher;
use crate::manifest::PageDescriptor;
use crate::segment::CoverSet;
use crate::split::split_halves;

/// How a verdict was reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Classified,
    /// The page has no image service to fetch from.
    NoImage,
    /// Fetching, decoding or classifying failed; the verdict is the default.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageVerdict {
    pub page: PageDescriptor,
    pub is_cover: bool,
    pub confidence: f32,
    pub outcome: Outcome,
}

impl PageVerdict {
    fn classified(page: PageDescriptor, c: Classification) -> Self {
        Self {
            page,
            is_cover: c.is_cover,
            confidence: c.confidence,
            outcome: Outcome::Classified,
        }
    }

    fn no_image(page: PageDescriptor) -> Self {
        Self::fallback(page, Outcome::NoImage)
    }

    fn failed(page: PageDescriptor, reason: String) -> Self {
        Self::fallback(page, Outcome::Failed(reason))
    }

    fn fallback(page: PageDescriptor, outcome: Outcome) -> Self {
        Self {
            page,
            is_cover: false,
            confidence: 0.0,
            outcome,
        }
    }
}

/// Receives one notification per completed page.
pub trait ProgressSink: Send + Sync {
    fn begin(&self, _total: usize) {}
    fn page_done(&self, completed: usize, total: usize);
}

impl ProgressSink for ProgressBar {
    fn begin(&self, total: usize) {
        self.set_length(total as u64);
        self.set_position(0);
    }

    fn page_done(&self, completed: usize, _total: usize) {
        self.set_position(completed as u64);
    }
}

/// Shared flag that stops a run between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one analysis run. Verdicts are in page order.
#[derive(Debug)]
pub struct Analysis {
    pub verdicts: Vec<PageVerdict>,
    /// The run stopped early; `verdicts` holds only the pages that finished.
    pub cancelled: bool,
}

impl Analysis {
    pub fn covers(&self) -> CoverSet {
        CoverSet::new(
            self.verdicts
                .iter()
                .filter(|v| v.is_cover)
                .map(|v| v.page.index),
        )
    }

    pub fn failures(&self) -> usize {
        self.verdicts
            .iter()
            .filter(|v| matches!(v.outcome, Outcome::Failed(_)))
            .count()
    }

    /// Nothing could be loaded: every page either lacked an image or failed.
    pub fn nothing_loaded(&self) -> bool {
        !self.verdicts.is_empty()
            && self
                .verdicts
                .iter()
                .all(|v| !matches!(v.outcome, Outcome::Classified))
    }
}

/// Drives the classifier over a page range, one verdict per page.
pub struct ClassificationPipeline<F, C> {
    fetcher: Arc<F>,
    classifier: Arc<C>,
    concurrency: usize,
}

impl<F: ImageFetcher, C: Classifier> ClassificationPipeline<F, C> {
    pub fn new(fetcher: Arc<F>, classifier: Arc<C>, concurrency: usize) -> Self {
        Self {
            fetcher,
            classifier,
            concurrency: concurrency.max(1),
        }
    }

    /// Classify `pages`, returning verdicts in input order.
    ///
    /// Per-page failures become default non-cover verdicts and are logged.
    /// Cancellation stops new pages from starting; pages already in flight
    /// finish and are returned.
    pub async fn analyze(
        &self,
        pages: &[PageDescriptor],
        split_scan: bool,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Analysis {
        let total = pages.len();
        progress.begin(total);
        if split_scan {
            info!("Split-scan mode: each image is classified as two halves");
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) =
            tokio::sync::mpsc::channel::<(usize, PageVerdict)>(self.concurrency * 2);

        let mut handles = Vec::with_capacity(total);
        for (slot, page) in pages.iter().cloned().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let classifier = Arc::clone(&self.classifier);
            let sem = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                let verdict = process_page(fetcher.as_ref(), classifier, page, split_scan).await;
                let _ = tx.send((slot, verdict)).await;
            }));
        }

        // rx closes once every task has finished or bailed out
        drop(tx);

        let mut slots: Vec<Option<PageVerdict>> = vec![None; total];
        let mut completed = 0usize;
        while let Some((slot, verdict)) = rx.recv().await {
            slots[slot] = Some(verdict);
            completed += 1;
            progress.page_done(completed, total);
        }

        // a task that panicked never sent; its page still gets a verdict
        for (slot, handle) in handles.into_iter().enumerate() {
            let Err(e) = handle.await else { continue };
            if slots[slot].is_some() {
                continue;
            }
            let page = pages[slot].clone();
            error!("Page {}: worker task failed: {}", page.index, e);
            slots[slot] = Some(PageVerdict::failed(page, format!("worker task failed: {}", e)));
            completed += 1;
            progress.page_done(completed, total);
        }

        let verdicts: Vec<PageVerdict> = slots.into_iter().flatten().collect();
        let cancelled = cancel.is_cancelled() && verdicts.len() < total;
        if cancelled {
            warn!("Analysis cancelled after {} of {} pages", verdicts.len(), total);
        }

        Analysis { verdicts, cancelled }
    }
}

async fn process_page<F: ImageFetcher, C: Classifier>(
    fetcher: &F,
    classifier: Arc<C>,
    page: PageDescriptor,
    split_scan: bool,
) -> PageVerdict {
    let Some(url) = page.image_locator.clone() else {
        warn!("Page {}: no image URL, skipping", page.index);
        return PageVerdict::no_image(page);
    };

    let bytes = match fetcher.fetch_image(&url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Page {}: could not fetch {}: {}", page.index, url, e);
            return PageVerdict::failed(page, e.to_string());
        }
    };

    let result = if split_scan {
        classify_split(classifier, bytes, page.index).await
    } else {
        classify_blocking(classifier, bytes).await
    };

    match result {
        Ok(c) => PageVerdict::classified(page, c),
        Err(e) => {
            error!("Page {}: classification failed for {}: {}", page.index, url, e);
            PageVerdict::failed(page, e.to_string())
        }
    }
}

async fn classify_blocking<C: Classifier>(
    classifier: Arc<C>,
    image: Vec<u8>,
) -> Result<Classification> {
    tokio::task::spawn_blocking(move || classifier.classify(&image))
        .await
        .map_err(|e| Error::Classification(format!("classifier task aborted: {}", e)))?
}

/// Classify both halves independently; a failed half counts as non-cover.
/// The page fails only if the image cannot be split or both halves fail.
async fn classify_split<C: Classifier>(
    classifier: Arc<C>,
    image: Vec<u8>,
    index: usize,
) -> Result<Classification> {
    let (left, right) = tokio::task::spawn_blocking(move || split_halves(&image))
        .await
        .map_err(|e| Error::Classification(format!("split task aborted: {}", e)))??;

    let (left, right) = tokio::join!(
        classify_blocking(Arc::clone(&classifier), left),
        classify_blocking(classifier, right),
    );

    match (left, right) {
        (Err(l), Err(r)) => Err(Error::Classification(format!(
            "both halves failed (left: {}; right: {})",
            l, r
        ))),
        (left, right) => {
            let left = left.unwrap_or_else(|e| {
                warn!("Page {}: left half failed: {}", index, e);
                Classification::NOT_COVER
            });
            let right = right.unwrap_or_else(|e| {
                warn!("Page {}: right half failed: {}", index, e);
                Classification::NOT_COVER
            });
            Ok(left.merge(right))
        }
    }
}
