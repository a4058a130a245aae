use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::db::repositories::{MerchantFilter, MerchantRepository};
use common::models::{Merchant, MerchantStatus, NewMerchant};

/// Query parameters for listing merchants
#[derive(Debug, Deserialize)]
pub struct ListMerchantsQuery {
    pub status: Option<String>,
    /// Substring of the name or email
    pub search: Option<String>,
    pub limit: Option<i64>,
}

impl ListMerchantsQuery {
    pub fn into_filter(self) -> Result<MerchantFilter, ErrorResponse> {
        let status = match self.status {
            Some(status_str) => Some(parse_status(&status_str)?),
            None => None,
        };
        let search = self.search.filter(|s| !s.trim().is_empty());

        Ok(MerchantFilter {
            status,
            search,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

fn parse_status(value: &str) -> Result<MerchantStatus, ErrorResponse> {
    value.parse::<MerchantStatus>().map_err(|_| {
        ErrorResponse::new(
            "validation_error",
            format!("Invalid status value: {}", value),
        )
    })
}

/// List merchants with filters
#[tracing::instrument(skip(state))]
pub async fn list_merchants(
    State(state): State<AppState>,
    Query(query): Query<ListMerchantsQuery>,
) -> Result<Json<SuccessResponse<Vec<Merchant>>>, ErrorResponse> {
    let filter = query.into_filter()?;

    let repo = MerchantRepository::new(state.pool_manager.clone());
    let merchants = repo.find_with_filter(filter).await?;

    tracing::info!(count = merchants.len(), "Listed merchants");
    Ok(Json(SuccessResponse::new(merchants)))
}

/// Register a merchant; new merchants start as pending
#[tracing::instrument(skip(state, request))]
pub async fn create_merchant(
    State(state): State<AppState>,
    Json(request): Json<NewMerchant>,
) -> Result<(StatusCode, Json<SuccessResponse<Merchant>>), ErrorResponse> {
    request.validate()?;
    let merchant = Merchant::new(request);

    let repo = MerchantRepository::new(state.pool_manager.clone());
    repo.create(&merchant).await?;

    Ok((StatusCode::CREATED, Json(SuccessResponse::new(merchant))))
}

/// Get merchant details by ID
#[tracing::instrument(skip(state))]
pub async fn get_merchant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<Merchant>>, ErrorResponse> {
    let repo = MerchantRepository::new(state.pool_manager.clone());

    match repo.find_by_id(id).await? {
        Some(merchant) => Ok(Json(SuccessResponse::new(merchant))),
        None => {
            tracing::warn!(merchant_id = %id, "Merchant not found");
            Err(ErrorResponse::new(
                "not_found",
                format!("Merchant not found: {}", id),
            ))
        }
    }
}

/// Activate, suspend or return a merchant to pending
#[tracing::instrument(skip(state))]
pub async fn update_merchant_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<SuccessResponse<Merchant>>, ErrorResponse> {
    let status = parse_status(&request.status)?;

    let repo = MerchantRepository::new(state.pool_manager.clone());
    let merchant = repo.update_status(id, status).await?;

    Ok(Json(SuccessResponse::new(merchant)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_into_filter() {
        let query = ListMerchantsQuery {
            status: Some("active".to_string()),
            search: Some("acme".to_string()),
            limit: Some(25),
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.status, Some(MerchantStatus::Active));
        assert_eq!(filter.search.as_deref(), Some("acme"));
        assert_eq!(filter.limit, Some(25));
    }

    #[test]
    fn test_blank_search_is_dropped() {
        let query = ListMerchantsQuery {
            status: None,
            search: Some("   ".to_string()),
            limit: None,
        };
        assert!(query.into_filter().unwrap().search.is_none());
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        let query = ListMerchantsQuery {
            status: Some("closed".to_string()),
            search: None,
            limit: None,
        };
        let err = query.into_filter().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
