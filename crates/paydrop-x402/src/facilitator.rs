use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GateError;
use crate::payload::PaymentPayload;
use crate::requirements::{PaymentRequirements, X402_VERSION};

/// HTTP client for an x402 facilitator service, which checks payment
/// signatures (`/verify`) and finalizes transfers on chain (`/settle`).
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FacilitatorRequest<'a> {
    x402_version: u8,
    payment_payload: &'a PaymentPayload,
    payment_requirements: &'a PaymentRequirements,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl FacilitatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, GateError> {
        debug!("Facilitator verify for resource {}", requirements.resource);
        self.post("verify", payload, requirements).await
    }

    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, GateError> {
        debug!("Facilitator settle for resource {}", requirements.resource);
        self.post("settle", payload, requirements).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<T, GateError> {
        let body = FacilitatorRequest {
            x402_version: X402_VERSION,
            payment_payload: payload,
            payment_requirements: requirements,
        };
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GateError::Facilitator(format!("POST {} failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| GateError::Facilitator(format!("POST {} failed: {}", url, e)))?;

        response
            .json::<T>()
            .await
            .map_err(|e| GateError::Facilitator(format!("bad response from {}: {}", url, e)))
    }
}

/// Encode a settle response as the opaque `X-PAYMENT-RESPONSE` header the
/// client echoes as settlement confirmation.
pub fn settle_response_header(response: &SettleResponse) -> Result<String, GateError> {
    let json = serde_json::to_vec(response)
        .map_err(|e| GateError::Facilitator(format!("cannot encode settle response: {}", e)))?;
    Ok(STANDARD.encode(json))
}
