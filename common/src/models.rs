use crate::errors::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Merchant Models
// ============================================================================

/// Merchant onboarded onto the gateway
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Merchant {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub status: MerchantStatus,
    pub settlement_currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Merchant {
    pub fn new(request: NewMerchant) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            email: request.email.trim().to_lowercase(),
            status: MerchantStatus::Pending,
            settlement_currency: request.settlement_currency.to_uppercase(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// MerchantStatus tracks onboarding and suspension
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MerchantStatus {
    Pending,
    Active,
    Suspended,
}

impl std::fmt::Display for MerchantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MerchantStatus::Pending => write!(f, "pending"),
            MerchantStatus::Active => write!(f, "active"),
            MerchantStatus::Suspended => write!(f, "suspended"),
        }
    }
}

impl FromStr for MerchantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MerchantStatus::Pending),
            "active" => Ok(MerchantStatus::Active),
            "suspended" => Ok(MerchantStatus::Suspended),
            _ => Err(format!("Invalid merchant status: {}", s)),
        }
    }
}

impl TryFrom<String> for MerchantStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// Payload for registering a merchant
#[derive(Debug, Clone, Deserialize)]
pub struct NewMerchant {
    pub name: String,
    pub email: String,
    pub settlement_currency: String,
}

impl NewMerchant {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        let email = self.email.trim();
        if email.is_empty() {
            return Err(ValidationError::MissingField("email".to_string()));
        }
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => {
                return Err(ValidationError::InvalidFieldValue {
                    field: "email".to_string(),
                    reason: format!("'{}' is not an email address", email),
                })
            }
        }
        let currency = &self.settlement_currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidFieldValue {
                field: "settlement_currency".to_string(),
                reason: "expected a three-letter ISO 4217 code".to_string(),
            });
        }
        Ok(())
    }
}
