use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope published once per admitted submission or manual retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub job_id: Uuid,
    pub source_url: String,
}
