//! Data-redaction job handlers
//!
//! Shopify's mandatory privacy webhooks are acknowledged immediately and the
//! actual work is queued as `shop_redact` / `customer_redact` jobs. Both
//! handlers are safe to run more than once.

use async_trait::async_trait;
use chrono::Utc;
use pricegrid_queue::{HandlerRegistry, JobHandler, JobResult, QueueError};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

pub const SHOP_REDACT: &str = "shop_redact";
pub const CUSTOMER_REDACT: &str = "customer_redact";

/// Job types every deployment must be able to run
pub const REDACTION_JOB_TYPES: [&str; 2] = [SHOP_REDACT, CUSTOMER_REDACT];

/// Kind of privacy request recorded in `gdpr_requests`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GdprRequestType {
    ShopRedact,
    CustomersRedact,
}

impl GdprRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShopRedact => "SHOP_REDACT",
            Self::CustomersRedact => "CUSTOMERS_REDACT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopRedactPayload {
    pub shop: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRedactPayload {
    pub shop: String,
    #[serde(default)]
    pub customer: Option<serde_json::Value>,
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    job_type: &str,
    payload: &serde_json::Value,
) -> Result<T, String> {
    serde_json::from_value(payload.clone())
        .map_err(|e| format!("invalid {} payload: {}", job_type, e))
}

/// Record an incoming privacy webhook so its processing can be tracked
pub async fn record_gdpr_request(
    pool: &SqlitePool,
    shop: &str,
    request_type: GdprRequestType,
    payload: &serde_json::Value,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO gdpr_requests (id, shop, request_type, payload, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(shop)
    .bind(request_type.as_str())
    .bind(payload.to_string())
    .bind(Utc::now().timestamp_millis())
    .execute(pool)
    .await?;
    Ok(id)
}

/// Deletes everything stored for a shop.
///
/// Removing the `stores` row cascades to price matrices and draft orders.
#[derive(Debug, Clone)]
pub struct ShopRedactHandler {
    pool: SqlitePool,
}

impl ShopRedactHandler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn redact(&self, shop: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM stores WHERE shop = ?")
            .bind(shop)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let acknowledged = sqlx::query(
            "UPDATE gdpr_requests SET processed_at = ? \
             WHERE shop = ? AND request_type = ? AND processed_at IS NULL",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(shop)
        .bind(GdprRequestType::ShopRedact.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        info!(shop, deleted, acknowledged, "Shop redact completed");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ShopRedactHandler {
    async fn handle(&self, payload: &serde_json::Value) -> JobResult {
        let payload: ShopRedactPayload = match parse_payload(SHOP_REDACT, payload) {
            Ok(p) => p,
            Err(e) => return JobResult::Failure(e),
        };
        if payload.shop.trim().is_empty() {
            return JobResult::failure("shop_redact payload has an empty shop");
        }

        self.redact(&payload.shop).await.into()
    }
}

/// Acknowledges a customer redaction request.
///
/// No customer-identifying data is stored (draft orders hold dimensions and
/// prices only), so there is nothing to delete.
#[derive(Debug, Clone)]
pub struct CustomerRedactHandler {
    pool: SqlitePool,
}

impl CustomerRedactHandler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn acknowledge(&self, shop: &str) -> Result<(), sqlx::Error> {
        let acknowledged = sqlx::query(
            "UPDATE gdpr_requests SET processed_at = ? \
             WHERE shop = ? AND request_type = ? AND processed_at IS NULL",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(shop)
        .bind(GdprRequestType::CustomersRedact.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        info!(shop, acknowledged, "Customer redact acknowledged, no customer data stored");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for CustomerRedactHandler {
    async fn handle(&self, payload: &serde_json::Value) -> JobResult {
        let payload: CustomerRedactPayload = match parse_payload(CUSTOMER_REDACT, payload) {
            Ok(p) => p,
            Err(e) => return JobResult::Failure(e),
        };

        self.acknowledge(&payload.shop).await.into()
    }
}

/// Register both redaction handlers against the same database
pub fn register_redaction_handlers(
    registry: &mut HandlerRegistry,
    pool: SqlitePool,
) -> Result<(), QueueError> {
    registry.register(SHOP_REDACT, ShopRedactHandler::new(pool.clone()))?;
    registry.register(CUSTOMER_REDACT, CustomerRedactHandler::new(pool))?;
    Ok(())
}
