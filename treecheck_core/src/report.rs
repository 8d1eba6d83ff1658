use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use treecheck_common::{ComparisonResult, Summary, TreeCheckError};

pub const REPORT_FILE_NAME: &str = "security_report.txt";
pub const ALERT_FILE_NAME: &str = "security_report_alert.txt";

/// Files produced by [`write_reports`]
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub full: PathBuf,
    pub alerts: PathBuf,
}

/// Sort results by path so reports are stable across runs
pub fn sort_results(results: &mut [ComparisonResult]) {
    results.sort_by(|a, b| a.path.cmp(&b.path).then(a.status.cmp(&b.status)));
}

/// Write every result to the full report and non-OK results to the alert
/// report, one `[STATUS] path` line each.
pub fn write_reports(dir: &Path, results: &[ComparisonResult]) -> Result<ReportPaths, TreeCheckError> {
    fs::create_dir_all(dir)?;

    let mut sorted = results.to_vec();
    sort_results(&mut sorted);

    let paths = ReportPaths {
        full: dir.join(REPORT_FILE_NAME),
        alerts: dir.join(ALERT_FILE_NAME),
    };

    let mut full = BufWriter::new(File::create(&paths.full)?);
    let mut alerts = BufWriter::new(File::create(&paths.alerts)?);

    for result in &sorted {
        writeln!(full, "{}", result)?;
        if result.status.is_alert() {
            writeln!(alerts, "{}", result)?;
        }
    }
    full.flush()?;
    alerts.flush()?;

    info!("Full report: {}", paths.full.display());
    info!("Alert report: {}", paths.alerts.display());
    Ok(paths)
}

#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub local: String,
    pub reference: String,
    pub generated_at: String,
    pub summary: Summary,
    pub results: Vec<ComparisonResult>,
}

impl JsonReport {
    /// Build a report, keeping only alerts when `alerts_only` is set. The
    /// summary always counts every result.
    pub fn new(local: &Path, reference: &Path, results: &[ComparisonResult], alerts_only: bool) -> Self {
        let mut entries: Vec<ComparisonResult> = results
            .iter()
            .filter(|r| !alerts_only || r.status.is_alert())
            .cloned()
            .collect();
        sort_results(&mut entries);

        Self {
            local: local.to_string_lossy().to_string(),
            reference: reference.to_string_lossy().to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            summary: Summary::from_results(results),
            results: entries,
        }
    }

    pub fn to_json(&self) -> Result<String, TreeCheckError> {
        serde_json::to_string_pretty(self).map_err(|e| TreeCheckError::Serialization(e.to_string()))
    }
}
