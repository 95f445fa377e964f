//! Command surface
//!
//! Commands arriving from any transport (HTTP, CLI) are decoded into
//! [`Command`] and answered with a [`CommandReply`].

use glean_common::config::ScanConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::SessionSnapshot;
use crate::session::{ScanCoordinator, ScanError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    StartScan {
        #[serde(default)]
        config: Option<ScanConfig>,
    },
    StopScan,
    GetStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandReply {
    Started { session_id: Uuid },
    StopRequested { accepted: bool },
    Status { snapshot: SessionSnapshot },
    Rejected { code: RejectionCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    AlreadyActive,
    InvalidConfig,
    Internal,
}

impl From<&ScanError> for RejectionCode {
    fn from(error: &ScanError) -> Self {
        match error {
            ScanError::AlreadyActive => RejectionCode::AlreadyActive,
            ScanError::InvalidConfig(_) => RejectionCode::InvalidConfig,
            ScanError::NoRetainedSession | ScanError::Merge(_) | ScanError::Aborted(_) => {
                RejectionCode::Internal
            }
        }
    }
}

impl ScanCoordinator {
    /// Execute one command
    pub fn dispatch(&self, command: Command) -> CommandReply {
        match command {
            Command::StartScan { config } => match self.start(config) {
                Ok(handle) => CommandReply::Started {
                    session_id: handle.session_id(),
                },
                Err(e) => CommandReply::Rejected {
                    code: RejectionCode::from(&e),
                    message: e.to_string(),
                },
            },
            Command::StopScan => CommandReply::StopRequested {
                accepted: self.request_stop(),
            },
            Command::GetStatus => CommandReply::Status {
                snapshot: self.status(),
            },
        }
    }
}
