// Merchant repository implementation

use super::queries::merchant_queries;
use crate::db::{PgPoolManager, PoolHandle};
use crate::errors::{is_connection_error, DatabaseError};
use crate::models::{Merchant, MerchantStatus};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Upper bound on rows returned by a single listing
pub const MAX_LIST_LIMIT: i64 = 500;
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Filters for listing merchants
#[derive(Debug, Clone, Default)]
pub struct MerchantFilter {
    pub status: Option<MerchantStatus>,
    /// Case-insensitive match against name or email
    pub search: Option<String>,
    pub limit: Option<i64>,
}

impl MerchantFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }

    /// Build the listing statement; placeholders are numbered in bind order
    pub fn to_sql(&self) -> String {
        let mut query = format!(
            "SELECT {} FROM merchants WHERE 1 = 1",
            merchant_queries::SELECT_ALL_COLUMNS
        );
        let mut param_count = 1;

        if self.status.is_some() {
            query.push_str(&format!(" AND status = ${}", param_count));
            param_count += 1;
        }

        if self.search.is_some() {
            query.push_str(&format!(
                " AND (name ILIKE ${0} ESCAPE '\\' OR email ILIKE ${0} ESCAPE '\\')",
                param_count
            ));
            param_count += 1;
        }

        query.push_str(&format!(" ORDER BY created_at DESC LIMIT ${}", param_count));
        query
    }

    /// ILIKE pattern for `search`; wildcards and backslashes in user text match literally
    pub fn search_pattern(&self) -> Option<String> {
        let search = self.search.as_deref()?.trim();
        let mut pattern = String::with_capacity(search.len() + 2);
        pattern.push('%');
        for c in search.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        Some(pattern)
    }
}

/// Repository for merchant-related database operations
///
/// Every call acquires its pool from the manager; connection-level failures
/// are reported back so the next call gets a fresh pool.
pub struct MerchantRepository {
    manager: Arc<PgPoolManager>,
}

impl MerchantRepository {
    pub fn new(manager: Arc<PgPoolManager>) -> Self {
        Self { manager }
    }

    async fn observe<T>(
        &self,
        handle: &PoolHandle<PgPool>,
        result: Result<T, sqlx::Error>,
    ) -> Result<T, DatabaseError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if is_connection_error(&e) {
                    self.manager.invalidate(handle).await;
                }
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self, merchant), fields(merchant_id = %merchant.id))]
    pub async fn create(&self, merchant: &Merchant) -> Result<(), DatabaseError> {
        let handle = self.manager.acquire().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO merchants (
                id, name, email, status, settlement_currency, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(merchant.id)
        .bind(&merchant.name)
        .bind(&merchant.email)
        .bind(merchant.status.to_string())
        .bind(&merchant.settlement_currency)
        .bind(merchant.created_at)
        .bind(merchant.updated_at)
        .execute(handle.pool())
        .await;
        self.observe(&handle, result).await?;

        tracing::info!(merchant_id = %merchant.id, "Merchant created");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Merchant>, DatabaseError> {
        let handle = self.manager.acquire().await?;

        let query = format!(
            "SELECT {} FROM merchants WHERE id = $1",
            merchant_queries::SELECT_ALL_COLUMNS
        );
        let result = sqlx::query_as::<_, Merchant>(&query)
            .bind(id)
            .fetch_optional(handle.pool())
            .await;

        self.observe(&handle, result).await
    }

    #[instrument(skip(self))]
    pub async fn find_with_filter(
        &self,
        filter: MerchantFilter,
    ) -> Result<Vec<Merchant>, DatabaseError> {
        let handle = self.manager.acquire().await?;

        let query = filter.to_sql();
        let mut query_builder = sqlx::query_as::<_, Merchant>(&query);

        if let Some(status) = filter.status {
            query_builder = query_builder.bind(status.to_string());
        }

        if let Some(pattern) = filter.search_pattern() {
            query_builder = query_builder.bind(pattern);
        }

        query_builder = query_builder.bind(filter.effective_limit());

        let result = query_builder.fetch_all(handle.pool()).await;
        let merchants = self.observe(&handle, result).await?;

        tracing::debug!(count = merchants.len(), "Found merchants with filter");
        Ok(merchants)
    }

    /// Change a merchant's status, returning the updated row
    ///
    /// # Errors
    /// `DatabaseError::NotFound` when no merchant has this id
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        id: Uuid,
        status: MerchantStatus,
    ) -> Result<Merchant, DatabaseError> {
        let handle = self.manager.acquire().await?;

        let query = format!(
            "UPDATE merchants SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {}",
            merchant_queries::SELECT_ALL_COLUMNS
        );
        let result = sqlx::query_as::<_, Merchant>(&query)
            .bind(id)
            .bind(status.to_string())
            .bind(Utc::now())
            .fetch_optional(handle.pool())
            .await;

        match self.observe(&handle, result).await? {
            Some(merchant) => {
                tracing::info!(merchant_id = %id, status = %status, "Merchant status updated");
                Ok(merchant)
            }
            None => Err(DatabaseError::NotFound(format!("Merchant {}", id))),
        }
    }
}
