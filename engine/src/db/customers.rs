/// Customer persistence and segment queries
///
/// Customers are the population the campaign segment predicates run over.
/// The repository implements `SegmentSource` by fetching a tenant's
/// customers and filtering through the fixed predicate set, so the same
/// predicates serve both SQL-backed and in-memory sources.
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::campaign::segments::{segment_matches, SegmentSource};
use crate::messaging::Channel;
use crate::tasks::unix_now;

/// Customer record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_opt_in: bool,
    pub sms_opt_in: bool,
    pub loyalty_points: i64,
    pub visit_count: i64,
    /// Unix timestamp of the last visit; 0 when unknown
    pub last_visit_at: i64,
}

impl Customer {
    /// Whether the customer has opted into the given channel
    pub fn opted_in(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_opt_in,
            Channel::Sms => self.sms_opt_in,
        }
    }

    /// The address to deliver to on the given channel, when one is on file
    pub fn address(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms => self.phone.as_deref(),
        }
    }
}

/// Customer repository for database operations
#[derive(Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a customer record
    pub async fn upsert(&self, customer: &Customer) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO customers \
             (id, tenant_id, name, email, phone, email_opt_in, sms_opt_in, loyalty_points, visit_count, last_visit_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&customer.id)
        .bind(&customer.tenant_id)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(customer.email_opt_in)
        .bind(customer.sms_opt_in)
        .bind(customer.loyalty_points)
        .bind(customer.visit_count)
        .bind(customer.last_visit_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert customer")?;

        Ok(())
    }

    /// All customers of a tenant
    pub async fn all_for_tenant(&self, tenant_id: &str) -> Result<Vec<Customer>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, email, phone, email_opt_in, sms_opt_in, \
                    loyalty_points, visit_count, last_visit_at \
             FROM customers WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch customers")?;

        Ok(rows
            .into_iter()
            .map(|r| Customer {
                id: r.get("id"),
                tenant_id: r.get("tenant_id"),
                name: r.get("name"),
                email: r.get("email"),
                phone: r.get("phone"),
                email_opt_in: r.get("email_opt_in"),
                sms_opt_in: r.get("sms_opt_in"),
                loyalty_points: r.get("loyalty_points"),
                visit_count: r.get("visit_count"),
                last_visit_at: r.get("last_visit_at"),
            })
            .collect())
    }
}

#[async_trait]
impl SegmentSource for CustomerRepository {
    async fn customers(&self, tenant_id: &str) -> Result<Vec<Customer>> {
        self.all_for_tenant(tenant_id).await
    }

    async fn customers_in(&self, tenant_id: &str, segment: &str) -> Result<Vec<Customer>> {
        let now = unix_now();
        let all = self.all_for_tenant(tenant_id).await?;
        Ok(all
            .into_iter()
            .filter(|c| segment_matches(segment, c, now))
            .collect())
    }
}
