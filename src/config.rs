//! Runtime settings assembled from CLI flags and environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

pub const IMAGE_SIZE: &str = "1200,";
pub const CONCURRENCY: usize = 4;
pub const MANIFEST_TIMEOUT_SECS: u64 = 30;
pub const IMAGE_TIMEOUT_SECS: u64 = 45;
pub const MAX_RETRIES: u32 = 3;
pub const BASE_BACKOFF_MS: u64 = 1000;
pub const CLASSIFIER_PROGRAM: &str = "python3";
pub const CLASSIFIER_SCRIPT: &str = "classifier/classify.py";

/// Zero-shot prompts handed to the classifier. The first one is the cover label.
pub const COVER_LABELS: &[&str] = &[
    "a photo of a newspaper cover with a title and masthead",
    "a photo of an internal page with articles and blocks of body text (not title and masthead)",
    "a photo of an internal page full of advertisements or announcements (not title and masthead)",
    "a photo of an internal page with a large illustration or photograph (not title and masthead)",
    "a photo of a table of contents or an editorial page (not title and masthead)",
];

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub manifest_timeout: Duration,
    pub image_timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            manifest_timeout: Duration::from_secs(MANIFEST_TIMEOUT_SECS),
            image_timeout: Duration::from_secs(IMAGE_TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// Executable to run per image.
    pub program: String,
    /// Leading arguments, usually the script path.
    pub args: Vec<String>,
    /// Scratch directory for the temporary image files.
    pub work_dir: PathBuf,
    pub labels: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            program: CLASSIFIER_PROGRAM.to_string(),
            args: vec![CLASSIFIER_SCRIPT.to_string()],
            work_dir: std::env::temp_dir().join("issue_ranges"),
            labels: COVER_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// IIIF size parameter for page images, e.g. `1200,`.
    pub image_size: String,
    /// Pages fetched and classified at the same time.
    pub concurrency: usize,
    pub fetch: FetchSettings,
    pub classifier: ClassifierSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE.to_string(),
            concurrency: CONCURRENCY,
            fetch: FetchSettings::default(),
            classifier: ClassifierSettings::default(),
        }
    }
}

impl Settings {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_image_size(mut self, size: impl Into<String>) -> Self {
        self.image_size = size.into();
        self
    }

    /// Split a command line such as `python3 classifier/classify.py` into program and args.
    pub fn with_classifier_command(mut self, command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        if let Some(program) = parts.next() {
            self.classifier.program = program;
            self.classifier.args = parts.collect();
        }
        self
    }
}
