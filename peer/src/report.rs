//! Outward match reports
//!
//! Exactly one report leaves a peer per match: a `MatchResult` after the
//! settle delay, or a `MatchAbort` on the first fatal error. Reports are JSON
//! objects handed to a `ReportSink`.

use crate::error::MatchError;
use log::{error, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Won,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub match_id: String,
    pub player_id: String,
    pub opponent_id: String,
    pub outcome: Outcome,
    pub local_score: u32,
    pub opponent_score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAbort {
    pub message: String,
    pub error: String,
    pub error_code: String,
}

impl From<&MatchError> for MatchAbort {
    fn from(err: &MatchError) -> Self {
        Self {
            message: err.headline().to_string(),
            error: err.to_string(),
            error_code: err.error_code().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Report {
    Result(MatchResult),
    Abort(MatchAbort),
}

impl Report {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub trait ReportSink {
    fn deliver(&mut self, report: &Report);
}

/// Writes each report as one JSON log line.
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn deliver(&mut self, report: &Report) {
        match report.to_json() {
            Ok(json) => match report {
                Report::Result(_) => info!("Match result: {}", json),
                Report::Abort(_) => error!("Match aborted: {}", json),
            },
            Err(e) => error!("Failed to serialize report {:?}: {}", report, e),
        }
    }
}

/// Keeps every delivered report in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub reports: Vec<Report>,
}

impl ReportSink for RecordingSink {
    fn deliver(&mut self, report: &Report) {
        self.reports.push(report.clone());
    }
}
