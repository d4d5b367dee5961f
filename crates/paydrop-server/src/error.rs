use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use paydrop_x402::challenge::headers as x402_headers;
use paydrop_x402::{PaymentChallenge, PaymentRequirements, X402_VERSION};

/// Request failures, mapped to the HTTP surface. The three 402 variants are
/// deliberately distinct: a challenge is normal control flow, a
/// verification failure means the proof was bad, and a settlement failure
/// means the proof was fine but finalization failed (retryable without a
/// new proof).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Expired(String),

    #[error("payment required")]
    PaymentRequired(Box<PaymentChallenge>),

    #[error("payment verification failed: {reason}")]
    VerificationFailed {
        reason: String,
        payer: Option<String>,
        accepts: Vec<PaymentRequirements>,
    },

    #[error("payment settlement failed: {reason}")]
    SettlementFailed {
        reason: String,
        accepts: Vec<PaymentRequirements>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Expired(message) => {
                (StatusCode::GONE, Json(json!({ "error": message }))).into_response()
            }
            ApiError::PaymentRequired(challenge) => {
                let headers = challenge_headers(&challenge);
                let body = Json(json!({
                    "error": "Payment Required",
                    "message": "This resource requires payment",
                    "challenge": *challenge,
                }));
                (StatusCode::PAYMENT_REQUIRED, headers, body).into_response()
            }
            ApiError::VerificationFailed {
                reason,
                payer,
                accepts,
            } => {
                let mut body = json!({
                    "x402Version": X402_VERSION,
                    "error": reason,
                    "accepts": accepts,
                });
                if let Some(payer) = payer {
                    body["payer"] = json!(payer);
                }
                (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
            }
            ApiError::SettlementFailed { reason, accepts } => {
                let body = json!({
                    "x402Version": X402_VERSION,
                    "error": reason,
                    "accepts": accepts,
                });
                (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
            }
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Mirror the challenge into the X-Payment-* response headers.
fn challenge_headers(challenge: &PaymentChallenge) -> HeaderMap {
    let mut headers = HeaderMap::new();
    // Header names are declared in their documented mixed case; parse them
    // rather than relying on from_static, which requires lowercase.
    let mut put = |name: &str, value: &str| {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    };

    put("WWW-Authenticate", x402_headers::WWW_AUTHENTICATE_VALUE);
    put(x402_headers::PAYMENT_REQUIRED, "true");
    put(x402_headers::PAYMENT_AMOUNT, &challenge.amount);
    put(x402_headers::PAYMENT_CURRENCY, &challenge.currency);
    put(x402_headers::PAYMENT_RECEIVER, &challenge.receiver);
    put(x402_headers::PAYMENT_NETWORK, &challenge.network);
    put(x402_headers::PAYMENT_CHAIN_ID, &challenge.chain_id);
    put(x402_headers::PAYMENT_DESCRIPTION, &challenge.description);
    if let Ok(metadata) = serde_json::to_string(&challenge.metadata) {
        put(x402_headers::PAYMENT_METADATA, &metadata);
    }
    put(x402_headers::PAYMENT_NONCE, &challenge.nonce);

    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(x402_headers::EXPOSED),
    );
    headers
}
