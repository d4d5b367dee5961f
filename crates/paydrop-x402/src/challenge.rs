use serde::{Deserialize, Serialize};

/// Response header names for the structured payment challenge issued when a
/// guarded resource is requested without a usable proof.
pub mod headers {
    pub const WWW_AUTHENTICATE_VALUE: &str = "X402";
    pub const PAYMENT_REQUIRED: &str = "X-Payment-Required";
    pub const PAYMENT_AMOUNT: &str = "X-Payment-Amount";
    pub const PAYMENT_CURRENCY: &str = "X-Payment-Currency";
    pub const PAYMENT_RECEIVER: &str = "X-Payment-Receiver";
    pub const PAYMENT_NETWORK: &str = "X-Payment-Network";
    pub const PAYMENT_CHAIN_ID: &str = "X-Payment-Chain-Id";
    pub const PAYMENT_DESCRIPTION: &str = "X-Payment-Description";
    pub const PAYMENT_METADATA: &str = "X-Payment-Metadata";
    pub const PAYMENT_NONCE: &str = "X-Payment-Nonce";

    /// Request header carrying the repeat-access attestation.
    pub const PAYMENT_PROOF: &str = "X-Payment-Proof";
    /// Request header carrying the inline x402 proof.
    pub const PAYMENT: &str = "X-PAYMENT";
    /// Response header carrying the settlement receipt.
    pub const PAYMENT_RESPONSE: &str = "X-PAYMENT-RESPONSE";

    pub const EXPOSED: &str = "WWW-Authenticate, X-Payment-Required, X-Payment-Amount, \
        X-Payment-Currency, X-Payment-Receiver, X-Payment-Network, X-Payment-Chain-Id, \
        X-Payment-Description, X-Payment-Metadata, X-Payment-Nonce, X-PAYMENT-RESPONSE";
}

/// The payment challenge carried in the 402 body and mirrored into the
/// X-Payment-* headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    /// Price as a decimal string, exactly as stored on the file record.
    pub amount: String,
    pub currency: String,
    pub receiver: String,
    pub network: String,
    pub chain_id: String,
    pub description: String,
    pub metadata: ChallengeMetadata,
    pub nonce: String,
    /// Issuance time, unix milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeMetadata {
    pub file_id: String,
    pub share_link: String,
    pub filename: String,
    pub size: i64,
    pub duration: i64,
}

/// Repeat-access attestation sent back by a client that already paid:
/// the paying file id plus the on-chain transaction hash. Weaker than the
/// inline proof — the caller must cross-check `file_id` against the
/// resource actually being requested before trusting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub file_id: String,
    pub transaction_hash: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 16 random bytes, hex encoded.
pub fn new_nonce() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
