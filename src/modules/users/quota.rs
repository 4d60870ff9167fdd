use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, info};
use uuid::Uuid;

use super::model::QuotaKind;
use super::repository::UserStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGrant {
    pub granted: bool,
    pub remaining: i32,
}

/// Admission control over the two monthly counters.
///
/// A granted unit is never refunded, even when the work it paid for fails
/// later on: the unit is spent once the attempt is made.
#[derive(Clone)]
pub struct QuotaGate {
    users: Arc<dyn UserStore>,
}

impl QuotaGate {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    pub async fn try_consume(&self, user_id: Uuid, kind: QuotaKind, amount: i32) -> Result<QuotaGrant> {
        if amount < 1 {
            return Err(anyhow!("Quota charge must be at least one unit, got {}", amount));
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| anyhow!("User {} not found", user_id))?;
        let limit = kind.limit(user.plan());

        match self
            .users
            .increment_usage_bounded(user_id, kind, amount, limit)
            .await?
        {
            Some(used) => {
                info!(%user_id, quota = %kind, used, limit, "Quota unit consumed");
                Ok(QuotaGrant {
                    granted: true,
                    remaining: (limit - used).max(0),
                })
            }
            None => {
                debug!(%user_id, quota = %kind, limit, "Quota charge refused");
                Ok(QuotaGrant {
                    granted: false,
                    remaining: user.remaining(kind),
                })
            }
        }
    }
}
