// SQL query constants for repositories

/// SQL query fragments for the merchants table
pub mod merchant_queries {
    /// All columns for merchants, in `Merchant` field order
    pub const SELECT_ALL_COLUMNS: &str =
        "id, name, email, status, settlement_currency, created_at, updated_at";
}
