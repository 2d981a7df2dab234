//! Request and response models for the execution API.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Exit code reported for every failure not attributable to the user
/// program (engine unreachable, image missing, timeout).
pub const INFRA_EXIT_CODE: i64 = -1;

/// Request to execute a snippet of Python code in the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Python source, written to `/execution/main.py` inside the sandbox.
    pub code: String,

    /// Optional input files: filename -> base64-encoded content.
    /// They are materialised under `/execution/files/`.
    #[serde(default)]
    pub files: Option<HashMap<String, String>>,
}

/// Result of one execution, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    /// True iff the user program exited with status 0.
    pub success: bool,

    /// Captured standard output.
    #[serde(default)]
    pub output: String,

    /// Captured standard error, or an infrastructure failure cause.
    #[serde(default)]
    pub error: String,

    /// Process exit status; [`INFRA_EXIT_CODE`] for infrastructure failures.
    pub exit_code: i64,

    /// Short opaque identifier for this execution (8 lowercase hex chars).
    pub execution_id: String,

    /// Files harvested from `/execution/output/`: basename -> base64 bytes.
    /// Absent when nothing matched the harvest filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_files: Option<BTreeMap<String, String>>,
}

impl ExecutionResponse {
    /// Response for a program that ran to completion with `exit_code`.
    pub fn completed(
        execution_id: impl Into<String>,
        exit_code: i64,
        output: String,
        error: String,
        output_files: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            success: exit_code == 0,
            output,
            error,
            exit_code,
            execution_id: execution_id.into(),
            output_files,
        }
    }

    /// Response for a failure not attributable to the user program.
    pub fn infrastructure_failure(execution_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            exit_code: INFRA_EXIT_CODE,
            execution_id: execution_id.into(),
            output_files: None,
        }
    }

    /// Response for a sandbox that did not exit within the deadline.
    pub fn timeout(execution_id: impl Into<String>, timeout_secs: u64) -> Self {
        Self::infrastructure_failure(execution_id, format!("Execution timeout ({timeout_secs}s)"))
    }
}

/// Service health report returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: HealthState,

    /// Human-readable diagnostics.
    #[serde(default)]
    pub message: String,
}

impl HealthResponse {
    /// Healthy report with diagnostics.
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Healthy,
            message: message.into(),
        }
    }

    /// Unhealthy report with diagnostics.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            message: message.into(),
        }
    }
}

/// Binary health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Sandbox image usable and container engine reachable.
    Healthy,
    /// Image missing or engine unreachable; executions will fail.
    Unhealthy,
}
