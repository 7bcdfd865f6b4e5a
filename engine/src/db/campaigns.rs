/// Campaign state persistence
///
/// One row per campaign holding the full serialized `CampaignState`, plus
/// denormalized columns for listing. The workflow rewrites the row after
/// every node transition, so `load` always returns the latest resumable
/// snapshot.
use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::campaign::CampaignState;

/// Campaign repository for database operations
#[derive(Clone)]
pub struct CampaignRepository {
    pool: SqlitePool,
}

impl CampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert the campaign's current snapshot
    pub async fn save(&self, state: &CampaignState) -> Result<()> {
        let serialized =
            serde_json::to_string(state).context("Failed to serialize campaign state")?;

        sqlx::query(
            "INSERT INTO campaigns (id, tenant_id, goal, current_step, state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               current_step = excluded.current_step, \
               state = excluded.state, \
               updated_at = excluded.updated_at",
        )
        .bind(&state.id)
        .bind(&state.tenant_id)
        .bind(&state.goal)
        .bind(state.current_step.as_str())
        .bind(&serialized)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to save campaign state")?;

        Ok(())
    }

    /// Load a campaign's latest snapshot
    pub async fn load(&self, campaign_id: &str) -> Result<Option<CampaignState>> {
        let row = sqlx::query("SELECT state FROM campaigns WHERE id = ?")
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch campaign")?;

        match row {
            Some(r) => {
                let serialized: String = r.get("state");
                let state = serde_json::from_str(&serialized)
                    .context("Failed to deserialize campaign state")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// List a tenant's campaigns as (id, current_step, goal), newest first
    pub async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<(String, String, String)>> {
        let rows = sqlx::query(
            "SELECT id, current_step, goal FROM campaigns \
             WHERE tenant_id = ? ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list campaigns")?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("id"), r.get("current_step"), r.get("goal")))
            .collect())
    }
}
