use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Decoded `X-PAYMENT` header: an exact-scheme EVM payment with an
/// EIP-3009 transfer authorization signed by the payer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    #[serde(default)]
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    pub payload: ExactEvmPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: String,
    pub authorization: TransferAuthorization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAuthorization {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    pub nonce: String,
}

/// Decode the base64 JSON `X-PAYMENT` header value.
pub fn decode_payment(header: &str) -> Result<PaymentPayload, GateError> {
    let raw = STANDARD
        .decode(header.trim())
        .map_err(|e| GateError::MalformedProof(format!("invalid base64: {}", e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| GateError::MalformedProof(format!("invalid payment payload: {}", e)))
}
