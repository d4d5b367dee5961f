/// Database row types — these map directly to SQLite rows.
/// Distinct from the paydrop-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: String,
    pub filename: String,
    pub original_filename: String,
    pub filepath: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub duration_days: i64,
    pub price_usd: String,
    pub share_link: String,
    pub expiry_date: String,
    pub payment_status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub id: String,
    pub file_id: String,
    pub amount_usd: String,
    pub payment_status: String,
    pub transaction_hash: Option<String>,
    pub payment_data: Option<String>,
    pub paid_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub id: String,
    pub file_id: String,
    pub payment_id: Option<String>,
    pub event_type: String,
    pub event_data: Option<String>,
    pub created_at: String,
}
