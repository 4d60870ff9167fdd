use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::plans::{self, Plan};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Pro,
    Agency,
}

impl From<String> for PlanTier {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "starter" => PlanTier::Starter,
            "pro" => PlanTier::Pro,
            "agency" => PlanTier::Agency,
            // Unknown or legacy plan names get the free limits.
            _ => PlanTier::Free,
        }
    }
}

/// Which of the two monthly counters a charge applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    /// One scraped caption transcript.
    Standard,
    /// One audio download + remote transcription.
    Fallback,
}

impl QuotaKind {
    pub(crate) fn column(self) -> &'static str {
        match self {
            QuotaKind::Standard => "monthly_quota_used",
            QuotaKind::Fallback => "whisper_quota_used",
        }
    }

    pub fn limit(self, plan: &Plan) -> i32 {
        match self {
            QuotaKind::Standard => plan.monthly_quota,
            QuotaKind::Fallback => plan.whisper_quota,
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaKind::Standard => f.write_str("monthly"),
            QuotaKind::Fallback => f.write_str("audio"),
        }
    }
}

/// The slice of the account record the pipeline reads and charges.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub plan: PlanTier,
    pub monthly_quota_used: i32,
    pub whisper_quota_used: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub quota_reset_at: OffsetDateTime,
}

impl User {
    pub fn plan(&self) -> &'static Plan {
        plans::for_tier(self.plan)
    }

    pub fn usage(&self, kind: QuotaKind) -> i32 {
        match kind {
            QuotaKind::Standard => self.monthly_quota_used,
            QuotaKind::Fallback => self.whisper_quota_used,
        }
    }

    pub fn remaining(&self, kind: QuotaKind) -> i32 {
        (kind.limit(self.plan()) - self.usage(kind)).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_plan_names_fall_back_to_free() {
        assert_eq!(PlanTier::from("enterprise".to_string()), PlanTier::Free);
        assert_eq!(PlanTier::from("PRO".to_string()), PlanTier::Pro);
    }

    #[test]
    fn remaining_never_goes_negative() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            plan: PlanTier::Free,
            monthly_quota_used: 9,
            whisper_quota_used: 0,
            quota_reset_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(user.remaining(QuotaKind::Standard), 0);
        assert_eq!(user.remaining(QuotaKind::Fallback), 1);
    }
}
