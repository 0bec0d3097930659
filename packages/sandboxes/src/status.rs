// ABOUTME: Client-facing sandbox status derived from a registry record
// ABOUTME: Collapses provisioning phases into progress, completed or failed

use crate::types::SandboxRecord;

/// Reported when a failed record carries no message
pub const FALLBACK_FAILURE_MESSAGE: &str = "Failed to spin sandbox";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxStatus {
    Progress,
    Completed { server_url: String },
    Failed { message: String },
    NotFound,
}

impl SandboxStatus {
    /// Derive the status from a record; an error always wins over readiness
    pub fn from_record(record: Option<&SandboxRecord>) -> Self {
        let Some(record) = record else {
            return SandboxStatus::NotFound;
        };

        if record.has_error {
            SandboxStatus::Failed {
                message: record
                    .error_message
                    .clone()
                    .unwrap_or_else(|| FALLBACK_FAILURE_MESSAGE.to_string()),
            }
        } else if !record.is_server_ready {
            SandboxStatus::Progress
        } else {
            SandboxStatus::Completed {
                server_url: record.server_url(),
            }
        }
    }

    /// Wire name; an unknown sandbox reports as failed
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Progress => "progress",
            SandboxStatus::Completed { .. } => "completed",
            SandboxStatus::Failed { .. } | SandboxStatus::NotFound => "failed",
        }
    }

    pub fn server_url(&self) -> Option<&str> {
        match self {
            SandboxStatus::Completed { server_url } => Some(server_url),
            _ => None,
        }
    }
}
