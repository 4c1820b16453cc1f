use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use crate::config::ClassifierSettings;
use crate::error::{Error, Result};

/// Cover/non-cover verdict for a single image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub is_cover: bool,
    /// Model confidence in `[0, 1]` for the winning label.
    pub confidence: f32,
}

impl Classification {
    pub const NOT_COVER: Classification = Classification {
        is_cover: false,
        confidence: 0.0,
    };

    pub fn new(is_cover: bool, confidence: f32) -> Self {
        Self {
            is_cover,
            confidence: clamp_confidence(confidence),
        }
    }

    /// Combine the two halves of a split scan: cover if either half is,
    /// with the higher of the two confidences.
    pub fn merge(self, other: Classification) -> Classification {
        Classification {
            is_cover: self.is_cover || other.is_cover,
            confidence: self.confidence.max(other.confidence),
        }
    }
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Image classification capability. Loaded once by the caller and shared
/// across all pages of a run.
pub trait Classifier: Send + Sync + 'static {
    fn classify(&self, image: &[u8]) -> Result<Classification>;
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    is_cover: Option<bool>,
    #[serde(default, alias = "prob")]
    confidence: Option<f32>,
    #[serde(default)]
    error: Option<String>,
}

/// Runs an external classifier program once per image.
///
/// The image is written to a scratch file passed as `--image <path>`, followed
/// by one `--label <text>` per prompt. The program prints a JSON object with
/// `is_cover` and `confidence` (or `prob`) on stdout.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
    labels: Vec<String>,
}

impl CommandClassifier {
    pub fn new(settings: &ClassifierSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            work_dir: settings.work_dir.clone(),
            labels: settings.labels.clone(),
        }
    }

    fn run(&self, image_path: &Path) -> Result<Classification> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg("--image").arg(image_path);
        for label in &self.labels {
            command.arg("--label").arg(label);
        }

        let output = command.output().map_err(|e| {
            Error::Classification(format!("failed to invoke {}: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Classification(format!(
                "classifier exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_response(&output.stdout)
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, image: &[u8]) -> Result<Classification> {
        if image.is_empty() {
            return Err(Error::Classification("empty image".into()));
        }
        fs::create_dir_all(&self.work_dir)?;
        // removed when dropped, including on early return
        let mut scratch = tempfile::Builder::new()
            .prefix("page-")
            .suffix(".img")
            .tempfile_in(&self.work_dir)?;
        scratch.write_all(image)?;
        scratch.flush()?;
        self.run(scratch.path())
    }
}

fn parse_response(stdout: &[u8]) -> Result<Classification> {
    let response: BridgeResponse = serde_json::from_slice(stdout)
        .map_err(|e| Error::Classification(format!("unreadable classifier output: {}", e)))?;

    if let Some(message) = response.error {
        return Err(Error::Classification(message));
    }
    let is_cover = response
        .is_cover
        .ok_or_else(|| Error::Classification("classifier output lacks is_cover".into()))?;

    Ok(Classification::new(is_cover, response.confidence.unwrap_or(0.0)))
}
