mod classifier;
mod config;
mod error;
mod export;
mod fetch;
mod manifest;
mod pipeline;
mod segment;
mod split;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use classifier::CommandClassifier;
use config::Settings;
use fetch::HttpFetcher;
use manifest::Manifest;
use pipeline::{Analysis, CancelToken, ClassificationPipeline};
use segment::CoverSet;

#[derive(Parser)]
#[command(
    name = "issue_ranges",
    version,
    about = "Detect newspaper covers in a IIIF manifest and split the volume into issues"
)]
struct Cli {
    /// Also write the log to this file
    #[arg(long, global = true, env = "ISSUE_RANGES_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show manifest label, id and page count
    Info {
        /// Manifest URL or local path
        manifest: String,
    },
    /// Classify pages and write the issue structure
    Analyze {
        /// Manifest URL or local path
        manifest: String,
        /// First page to analyze (1-based)
        #[arg(long, default_value_t = 1)]
        start: usize,
        /// Last page to analyze, inclusive (default: last page)
        #[arg(long)]
        end: Option<usize>,
        /// Each image holds two pages side by side; classify both halves
        #[arg(long)]
        split_scan: bool,
        /// Command that classifies one image
        #[arg(
            long,
            env = "ISSUE_RANGES_CLASSIFIER",
            default_value = "python3 classifier/classify.py"
        )]
        classifier: String,
        /// Pages fetched and classified at once
        #[arg(long, env = "ISSUE_RANGES_CONCURRENCY", default_value_t = config::CONCURRENCY)]
        concurrency: usize,
        /// IIIF size parameter for page images
        #[arg(long, env = "ISSUE_RANGES_IMAGE_SIZE", default_value = config::IMAGE_SIZE)]
        image_size: String,
        /// Write per-page verdicts as JSON
        #[arg(long)]
        report: Option<PathBuf>,
        /// Disable progress bar
        #[arg(short, long)]
        quiet: bool,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Write the issue structure from cover pages chosen by hand
    Structure {
        /// Manifest URL or local path
        manifest: String,
        /// Cover page numbers, e.g. 1,9,17
        #[arg(long, value_delimiter = ',', required = true)]
        covers: Vec<usize>,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Output file (default: manifest.json or ranges.txt)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// What to write
    #[arg(short, long, value_enum, default_value_t = Format::Manifest)]
    format: Format,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum Format {
    /// The input manifest with `structures` rewritten
    Manifest,
    /// One `start_id,end_id` line per issue
    Ranges,
}

impl OutputArgs {
    fn path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| match self.format {
            Format::Manifest => PathBuf::from("manifest.json"),
            Format::Ranges => PathBuf::from("ranges.txt"),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let t0 = Instant::now();
    let result = match cli.command {
        Commands::Info { manifest } => show_info(&manifest).await,
        Commands::Analyze {
            manifest,
            start,
            end,
            split_scan,
            classifier,
            concurrency,
            image_size,
            report,
            quiet,
            output,
        } => {
            let settings = Settings::default()
                .with_concurrency(concurrency)
                .with_image_size(image_size)
                .with_classifier_command(&classifier);
            let report = report.as_deref();
            analyze(&manifest, start, end, split_scan, &settings, report, quiet, &output).await
        }
        Commands::Structure {
            manifest,
            covers,
            output,
        } => structure(&manifest, covers, &output).await,
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {}", format_duration(elapsed));
    }

    result
}

/// Console logging always goes to stderr; `--log-file` adds a plain-text
/// copy of the same events.
fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

async fn load_manifest(source: &str, image_size: &str) -> anyhow::Result<Manifest> {
    let fetcher = HttpFetcher::new(Settings::default().fetch)?;
    manifest::load(source, &fetcher, image_size)
        .await
        .with_context(|| format!("Failed to load manifest: {}", source))
}

async fn show_info(source: &str) -> anyhow::Result<()> {
    let manifest = load_manifest(source, config::IMAGE_SIZE).await?;
    let without_image = manifest
        .pages()
        .iter()
        .filter(|p| p.image_locator.is_none())
        .count();

    println!("Manifest");
    println!("========");
    println!("Label:  {}", manifest.label().unwrap_or_else(|| "-".into()));
    println!("Id:     {}", manifest.namespace());
    println!("Pages:  {}", manifest.total_pages());
    if without_image > 0 {
        println!("No image: {}", without_image);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn analyze(
    source: &str,
    start: usize,
    end: Option<usize>,
    split_scan: bool,
    settings: &Settings,
    report: Option<&Path>,
    quiet: bool,
    output: &OutputArgs,
) -> anyhow::Result<()> {
    let fetcher = Arc::new(HttpFetcher::new(settings.fetch.clone())?);
    let manifest = manifest::load(source, &fetcher, &settings.image_size)
        .await
        .with_context(|| format!("Failed to load manifest: {}", source))?;

    let end = end.unwrap_or(manifest.total_pages());
    let pages = manifest.page_range(start, end)?;
    info!("Analyzing pages {} to {}", start, end);

    let classifier = Arc::new(CommandClassifier::new(&settings.classifier));
    let pipeline = ClassificationPipeline::new(fetcher, classifier, settings.concurrency);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing pages in flight");
            on_interrupt.cancel();
        }
    });

    let pb = progress_bar(quiet)?;
    let analysis = pipeline.analyze(pages, split_scan, &pb, &cancel).await;
    pb.finish_and_clear();

    if let Some(path) = report {
        export::write_report(path, &analysis.verdicts)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
    }
    if analysis.nothing_loaded() {
        anyhow::bail!("No page images could be loaded from {}", source);
    }

    log_summary(&analysis);
    write_outputs(manifest, start, end, &analysis.covers(), output)
}

async fn structure(source: &str, covers: Vec<usize>, output: &OutputArgs) -> anyhow::Result<()> {
    let manifest = load_manifest(source, config::IMAGE_SIZE).await?;
    let total = manifest.total_pages();
    if total == 0 {
        return Err(error::Error::EmptySource.into());
    }

    let covers = CoverSet::new(covers);
    info!("Selected {} cover pages: {:?}", covers.len(), covers.as_slice());
    write_outputs(manifest, 1, total, &covers, output)
}

fn write_outputs(
    manifest: Manifest,
    start: usize,
    end: usize,
    covers: &CoverSet,
    output: &OutputArgs,
) -> anyhow::Result<()> {
    if covers.is_empty() {
        info!("No covers; the volume gets no issue structure");
    }
    let spans = segment::segment(start, end, manifest.total_pages(), covers)?;
    let ranges = segment::resolve(&spans, manifest.pages());
    let path = output.path();

    match output.format {
        Format::Manifest => {
            let records = segment::build(&ranges, manifest.pages(), manifest.namespace());
            if records.is_empty() {
                info!("No issue structure; saving manifest without 'structures'");
            } else {
                info!("Built {} issue ranges", records.len());
            }
            let document = export::with_structures(manifest.into_document(), &records)?;
            export::write_manifest(&path, &document)
                .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
        }
        Format::Ranges => {
            export::write_ranges(&path, &ranges)
                .with_context(|| format!("Failed to write ranges: {}", path.display()))?;
        }
    }
    Ok(())
}

fn log_summary(analysis: &Analysis) {
    let covers: Vec<_> = analysis.verdicts.iter().filter(|v| v.is_cover).collect();
    if covers.is_empty() {
        info!("No cover pages found in the analyzed range");
    } else {
        info!("Found {} potential covers:", covers.len());
        for v in covers {
            info!(
                "- page {:<6} | confidence {:.2}%",
                v.page.index,
                v.confidence * 100.0
            );
        }
    }

    let failures = analysis.failures();
    if failures > 0 {
        warn!("{} pages could not be classified", failures);
    }
    if analysis.cancelled {
        warn!("Run was cancelled; structure reflects the pages analyzed so far");
    }
}

fn progress_bar(quiet: bool) -> anyhow::Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_output_follows_format() {
        let manifest = OutputArgs { output: None, format: Format::Manifest };
        let ranges = OutputArgs { output: None, format: Format::Ranges };
        assert_eq!(manifest.path(), PathBuf::from("manifest.json"));
        assert_eq!(ranges.path(), PathBuf::from("ranges.txt"));
    }

    #[test]
    fn cli_parses_analyze() {
        let cli = Cli::try_parse_from([
            "issue_ranges", "analyze", "https://h/manifest.json", "--start", "3", "--end", "40",
            "--split-scan", "-f", "ranges", "-o", "out.txt",
        ])
        .unwrap();
        match cli.command {
            Commands::Analyze { start, end, split_scan, output, .. } => {
                assert_eq!(start, 3);
                assert_eq!(end, Some(40));
                assert!(split_scan);
                assert_eq!(output.format, Format::Ranges);
                assert_eq!(output.path(), PathBuf::from("out.txt"));
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn cli_parses_cover_list() {
        let cli =
            Cli::try_parse_from(["issue_ranges", "structure", "m.json", "--covers", "9,1,17"])
                .unwrap();
        match cli.command {
            Commands::Structure { covers, .. } => assert_eq!(covers, vec![9, 1, 17]),
            _ => panic!("expected structure"),
        }
    }

    #[test]
    fn fixture_end_to_end_structure() {
        let bytes = std::fs::read("tests/fixtures/volume.json").unwrap();
        let manifest = Manifest::from_slice(&bytes, config::IMAGE_SIZE).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let output = OutputArgs { output: Some(path.clone()), format: Format::Manifest };

        write_outputs(manifest, 1, 6, &CoverSet::new([1, 4]), &output).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let structures = written["structures"].as_array().unwrap();
        assert_eq!(structures.len(), 2);
        assert_eq!(structures[0]["@id"], "https://iiif.example.org/volume/manifest/range/r0");
        assert_eq!(structures[1]["label"], "Issue starting at page 4");
        assert_eq!(structures[1]["canvases"].as_array().unwrap().len(), 3);
        assert_eq!(written["attribution"], "Biblioteka Cyfrowa");
    }

    fn fixture_manifest() -> Manifest {
        let bytes = std::fs::read("tests/fixtures/volume.json").unwrap();
        Manifest::from_slice(&bytes, config::IMAGE_SIZE).unwrap()
    }

    #[test]
    fn no_covers_drops_existing_structures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let output = OutputArgs { output: Some(path.clone()), format: Format::Manifest };

        write_outputs(fixture_manifest(), 1, 6, &CoverSet::new([]), &output).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(written.get("structures").is_none());
        assert_eq!(written["attribution"], "Biblioteka Cyfrowa");
    }

    #[test]
    fn no_covers_writes_no_ranges_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranges.txt");
        let output = OutputArgs { output: Some(path.clone()), format: Format::Ranges };

        write_outputs(fixture_manifest(), 1, 6, &CoverSet::new([]), &output).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn manual_covers_outside_volume_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let output = OutputArgs { output: Some(path.clone()), format: Format::Manifest };

        for bad in [0, 7] {
            let err = write_outputs(fixture_manifest(), 1, 6, &CoverSet::new([1, bad]), &output)
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<error::Error>(),
                Some(error::Error::CoverOutOfRange { index, start: 1, end: 6 }) if *index == bad
            ));
        }
        assert!(!path.exists());
    }

    #[test]
    fn format_duration_units() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
