use thiserror::Error;

/// Failures of the payment gate, separated so callers can map them to the
/// right HTTP shape (malformed proof and verifier rejection are client
/// errors; settlement rejection means the client's proof was fine but
/// finalization failed and a retry may succeed).
#[derive(Debug, Error)]
pub enum GateError {
    #[error("cannot express price in atomic units: {0}")]
    PriceConversion(String),

    #[error("unsupported payment network: {0}")]
    UnsupportedNetwork(String),

    #[error("invalid or malformed payment header: {0}")]
    MalformedProof(String),

    #[error("payment verification rejected: {reason}")]
    VerificationRejected {
        reason: String,
        payer: Option<String>,
    },

    #[error("facilitator request failed: {0}")]
    Facilitator(String),

    #[error("payment settlement rejected: {reason}")]
    SettlementRejected { reason: String },
}
