use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    config::RunConfig,
    session::{RequestResult, RequestStatus, RunSession, RunStatus},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub status: RunStatus,
    pub config: RunConfig,
    pub total_requests: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_requests: usize,
    pub completed_requests: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub passed_assertions: usize,
    pub failed_assertions: usize,
    pub total_duration_ms: f64,
}

impl RunSummary {
    /// One pass over `results`. Assertions only count for passed/failed results.
    pub fn tally(total_requests: usize, results: &[RequestResult]) -> Self {
        let mut summary = RunSummary {
            total_requests,
            completed_requests: results.len(),
            ..RunSummary::default()
        };
        for result in results {
            match result.status {
                RequestStatus::Passed | RequestStatus::Failed => {
                    if result.status == RequestStatus::Passed {
                        summary.passed += 1;
                    } else {
                        summary.failed += 1;
                    }
                    summary.passed_assertions += result.passed_assertions();
                    summary.failed_assertions += result.failed_assertions();
                }
                RequestStatus::Error => summary.errors += 1,
                RequestStatus::Skipped => summary.skipped += 1,
                RequestStatus::Pending | RequestStatus::Running => {}
            }
            summary.total_duration_ms += result.duration_ms;
        }
        summary
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub session_info: SessionInfo,
    pub summary: RunSummary,
    pub results: Vec<RequestResult>,
}

impl RunReport {
    pub fn from_session(session: &RunSession) -> Self {
        Self {
            session_info: SessionInfo {
                id: session.id().to_string(),
                collection: session.collection().to_string(),
                folder_path: session.folder_path().map(str::to_string),
                environment: session.environment().map(str::to_string),
                status: session.status(),
                config: session.config().clone(),
                total_requests: session.total_requests(),
                started_at: session.started_at(),
                finished_at: session.finished_at(),
            },
            summary: RunSummary::tally(session.total_requests(), session.results()),
            results: session.results().to_vec(),
        }
    }

    /// `run-<YYYYMMDD-HHMMSS-mmm>.json`, from the run start (or now if never started).
    pub fn file_name(&self) -> String {
        let at = self.session_info.started_at.unwrap_or_else(Utc::now);
        format!("run-{}.json", at.format("%Y%m%d-%H%M%S-%3f"))
    }
}

/// Writes the report as pretty JSON into `dir`, creating it when missing.
pub fn write_report(report: &RunReport, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating report directory {}", dir.display()))?;
    let path = unused_path(dir, &report.file_name());
    let json = serde_json::to_string_pretty(report).context("serializing run report")?;
    fs::write(&path, json).with_context(|| format!("writing report {}", path.display()))?;
    tracing::info!(path = %path.display(), "run report written");
    Ok(path)
}

/// `name` in `dir`, or `<stem>-<n>.json` when an earlier report already took it.
fn unused_path(dir: &Path, name: &str) -> PathBuf {
    let stem = name.trim_end_matches(".json");
    let mut candidate = dir.join(name);
    let mut index = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}-{index}.json"));
        index += 1;
    }
    candidate
}
