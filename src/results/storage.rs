//! Results storage and retrieval
//!
//! Persists the execute step state in its working directory: the result set
//! in `results.yaml` and the step status in `step.yaml`.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::TestResult;

pub const RESULTS_FILENAME: &str = "results.yaml";
pub const STEP_FILENAME: &str = "step.yaml";

/// Progress of the execute step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Todo,
    Done,
}

/// Content of `step.yaml`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StepState {
    status: StepStatus,
}

/// Generate unique run ID
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Results storage of a single step working directory
#[derive(Clone, Debug)]
pub struct ResultsStorage {
    workdir: PathBuf,
}

impl ResultsStorage {
    /// Create a new results storage
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Directory holding generated run directories
    pub fn base_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("guestrun")
            .join("runs")
    }

    /// Storage in a freshly named run directory under `base`
    pub fn new_run(base: &Path) -> Self {
        Self::new(base.join(format!("run-{}", generate_run_id())))
    }

    /// Most recently modified run directory under `base`
    pub fn latest_run(base: &Path) -> Result<Option<Self>> {
        if !base.exists() {
            return Ok(None);
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            runs.push((modified, entry.path()));
        }

        runs.sort();
        Ok(runs.pop().map(|(_, path)| Self::new(path)))
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Ensure storage directory exists
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.workdir).with_context(|| {
            format!(
                "Failed to create working directory {}",
                self.workdir.display()
            )
        })
    }

    pub fn results_path(&self) -> PathBuf {
        self.workdir.join(RESULTS_FILENAME)
    }

    /// Load the saved result set
    pub fn load_results(&self, allow_missing: bool) -> Result<Vec<TestResult>> {
        let path = self.results_path();

        if !path.exists() && allow_missing {
            debug!("No results saved in {}", self.workdir.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to open results file {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let results: Vec<TestResult> =
            serde_yaml::from_str(&content).context("Failed to parse results")?;

        debug!("Loaded {} results from {}", results.len(), path.display());
        Ok(results)
    }

    /// Save the result set
    pub fn save_results(&self, results: &[TestResult]) -> Result<PathBuf> {
        self.ensure_dir()?;

        let path = self.results_path();
        let file = File::create(&path).context("Failed to create results file")?;
        serde_yaml::to_writer(BufWriter::new(file), results).context("Failed to write results")?;

        debug!("Saved {} results to {}", results.len(), path.display());
        Ok(path)
    }

    /// Load the step status, `todo` if never saved
    pub fn load_status(&self) -> Result<StepStatus> {
        let path = self.workdir.join(STEP_FILENAME);
        if !path.exists() {
            return Ok(StepStatus::Todo);
        }

        let content = fs::read_to_string(&path).context("Failed to open step file")?;
        let state: StepState = serde_yaml::from_str(&content).context("Failed to parse step file")?;
        Ok(state.status)
    }

    pub fn save_status(&self, status: StepStatus) -> Result<()> {
        self.ensure_dir()?;

        let path = self.workdir.join(STEP_FILENAME);
        let content = serde_yaml::to_string(&StepState { status })?;
        fs::write(&path, content).context("Failed to write step file")?;
        Ok(())
    }

    /// Export results to a file
    pub fn export(results: &[TestResult], path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)?;
                serde_json::to_writer_pretty(BufWriter::new(file), results)?;
            }
            ExportFormat::Yaml => {
                let file = File::create(path)?;
                serde_yaml::to_writer(BufWriter::new(file), results)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;

                writer.write_record([
                    "serial_number",
                    "name",
                    "guest",
                    "result",
                    "start_time",
                    "duration",
                    "note",
                    "log",
                ])?;

                for result in results {
                    writer.write_record([
                        result.serial_number.to_string(),
                        result.name.clone(),
                        result.guest.name.clone(),
                        result.result.to_string(),
                        result.start_time.clone().unwrap_or_default(),
                        result.duration.clone().unwrap_or_default(),
                        result.note.join("; "),
                        result
                            .log
                            .iter()
                            .map(|log| log.display().to_string())
                            .collect::<Vec<_>>()
                            .join(" "),
                    ])?;
                }
                writer.flush()?;
            }
        }

        info!("Exported results to {}", path.display());
        Ok(())
    }
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "yaml" | "yml" => Some(ExportFormat::Yaml),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultGuestData, ResultOutcome};
    use tempfile::tempdir;

    fn sample() -> Vec<TestResult> {
        vec![
            TestResult::new("/a", ResultOutcome::Pass)
                .with_serial_number(1)
                .with_guest(ResultGuestData::new("client", Some("clients".into())))
                .with_note("fine")
                .with_log("data/guest/client/a-1/output.txt"),
            TestResult::pending("/b", 2, ResultGuestData::new("server", None)),
        ]
    }

    #[test]
    fn test_generate_run_id() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();
        assert!(!id1.is_empty());
        assert_eq!(id1.len(), id2.len());
    }

    #[test]
    fn test_results_round_trip() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());
        let results = sample();

        storage.save_results(&results).unwrap();
        let loaded = storage.load_results(false).unwrap();

        assert_eq!(loaded, results);
        let keys: Vec<_> = loaded.iter().map(TestResult::key).collect();
        assert_eq!(keys, results.iter().map(TestResult::key).collect::<Vec<_>>());
    }

    #[test]
    fn test_missing_results() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path().join("run"));

        assert!(storage.load_results(true).unwrap().is_empty());
        assert!(storage.load_results(false).is_err());
    }

    #[test]
    fn test_status_round_trip() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());

        assert_eq!(storage.load_status().unwrap(), StepStatus::Todo);
        storage.save_status(StepStatus::Done).unwrap();
        assert_eq!(storage.load_status().unwrap(), StepStatus::Done);
        assert_eq!(
            fs::read_to_string(dir.path().join(STEP_FILENAME)).unwrap(),
            "status: done\n"
        );
    }

    #[test]
    fn test_latest_run() {
        let dir = tempdir().unwrap();
        assert!(ResultsStorage::latest_run(&dir.path().join("none"))
            .unwrap()
            .is_none());

        let run = ResultsStorage::new_run(dir.path());
        run.ensure_dir().unwrap();

        let latest = ResultsStorage::latest_run(dir.path()).unwrap().unwrap();
        assert_eq!(latest.workdir(), run.workdir());
    }

    #[test]
    fn test_csv_export() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");

        ResultsStorage::export(&sample(), &path, ExportFormat::Csv).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("serial_number,name,guest,result,start_time,duration,note,log")
        );
        assert_eq!(
            lines.next(),
            Some("1,/a,client,PASS,,,fine,data/guest/client/a-1/output.txt")
        );
    }

    #[test]
    fn test_export_format() {
        assert_eq!(ExportFormat::from_str("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::from_str("YML"), Some(ExportFormat::Yaml));
        assert_eq!(
            ExportFormat::from_extension(Path::new("out.csv")),
            Some(ExportFormat::Csv)
        );
        assert!(ExportFormat::from_str("unknown").is_none());
    }
}
