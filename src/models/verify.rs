use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerifyStatus {
    Pending,
    Complete,
    Rejected,
}

impl VerifyStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, VerifyStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VerifyStatus::Pending => "pending",
            VerifyStatus::Complete => "complete",
            VerifyStatus::Rejected => "rejected",
        }
    }
}

/// Outcome of a physical check at one checkpoint for one delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verify {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub check_id: Uuid,
    pub status: VerifyStatus,
    pub comment: Option<String>,
    pub scanned_by: Uuid,
    pub verified_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Verify {
    pub fn pending(delivery_id: Uuid, check_id: Uuid, scanned_by: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            delivery_id,
            check_id,
            status: VerifyStatus::Pending,
            comment: None,
            scanned_by,
            verified_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Published after every verification write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationEvent {
    pub verify: Verify,
    pub delivery_completed: bool,
}
