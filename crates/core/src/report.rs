use crate::error::{Result, SiftError};
use crate::planner::{DecisionRecord, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub tiers: BTreeMap<String, usize>,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferReport {
    pub details: Vec<DecisionRecord>,
    pub summary: Summary,
}

/// Collects records in processing order.
#[derive(Debug, Default)]
pub struct ReportAggregator {
    details: Vec<DecisionRecord>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: DecisionRecord) {
        self.details.push(record);
    }

    pub fn finish(self) -> TransferReport {
        let summary = summarize(&self.details);
        TransferReport {
            details: self.details,
            summary,
        }
    }
}

pub fn summarize(details: &[DecisionRecord]) -> Summary {
    let mut summary = Summary {
        total: details.len(),
        ..Summary::default()
    };
    for rec in details {
        if let Some(tier) = &rec.tier {
            *summary.tiers.entry(tier.clone()).or_default() += 1;
        }
        match rec.outcome {
            Outcome::Executed => summary.executed += 1,
            Outcome::Skipped => summary.skipped += 1,
            Outcome::Failed => summary.failed += 1,
        }
    }
    summary
}

/// Pretty JSON with a trailing newline, written beside the target and renamed
/// into place so readers never see a partial file.
pub fn write_report(report: &TransferReport, path: &Path) -> Result<()> {
    let io_err = |op: &'static str| {
        move |e: std::io::Error| SiftError::Io {
            op,
            path: path.to_path_buf(),
            source: e,
        }
    };
    let mut body = serde_json::to_string_pretty(report).map_err(|e| SiftError::Io {
        op: "serialize report",
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    body.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err("create report directory"))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report.json".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    {
        let mut f = fs::File::create(&tmp).map_err(io_err("create report"))?;
        f.write_all(body.as_bytes()).map_err(io_err("write report"))?;
        f.sync_all().map_err(io_err("sync report"))?;
    }
    fs::rename(&tmp, path).map_err(io_err("rename report"))?;
    Ok(())
}
