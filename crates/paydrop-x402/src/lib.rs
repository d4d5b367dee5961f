//! x402 payment gate: no proof, no action.
//!
//! A guarded HTTP operation hands this crate a price and a resource URL and
//! gets back a [`PaymentRequirements`] set to advertise in a 402. A client
//! retry carrying an `X-PAYMENT` header is decoded, verified against the
//! best-matching requirement through a facilitator service, and — only on
//! the paths where money changes hands — settled on chain before the
//! guarded action runs. Settlement is synchronous: a valid-but-unsettled
//! proof must never release the resource.

pub mod challenge;
pub mod error;
pub mod facilitator;
pub mod payload;
pub mod requirements;

pub use challenge::{ChallengeMetadata, PaymentChallenge, PaymentProof};
pub use error::GateError;
pub use facilitator::{settle_response_header, FacilitatorClient, SettleResponse, VerifyResponse};
pub use payload::{decode_payment, PaymentPayload};
pub use requirements::{
    build_requirements, price_to_atomic, usdc_for_network, AssetInfo, Eip712Domain,
    PaymentRequirements, X402_VERSION,
};

use rust_decimal::Decimal;
use tracing::{info, warn};

/// A verified-but-not-yet-settled payment.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub payload: PaymentPayload,
    pub payer: Option<String>,
}

/// The payment gate for one receiver on one network.
#[derive(Debug, Clone)]
pub struct Gate {
    facilitator: FacilitatorClient,
    pay_to: String,
    network: String,
}

impl Gate {
    pub fn new(
        facilitator_url: impl Into<String>,
        pay_to: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            facilitator: FacilitatorClient::new(facilitator_url),
            pay_to: pay_to.into(),
            network: network.into(),
        }
    }

    pub fn receiver(&self) -> &str {
        &self.pay_to
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn asset(&self) -> Result<AssetInfo, GateError> {
        usdc_for_network(&self.network)
    }

    /// Package a USD price as payment requirements for one resource.
    pub fn build_requirements(
        &self,
        price: Decimal,
        resource: &str,
        description: &str,
    ) -> Result<PaymentRequirements, GateError> {
        requirements::build_requirements(price, &self.network, &self.pay_to, resource, description)
    }

    /// Decode the `X-PAYMENT` header and verify it with the facilitator
    /// against the best-matching requirement of the candidate set.
    pub async fn verify(
        &self,
        payment_header: &str,
        accepts: &[PaymentRequirements],
    ) -> Result<VerifiedPayment, GateError> {
        let payload = decode_payment(payment_header)?;
        let requirement = select_requirement(accepts, &payload)?;

        let response = self.facilitator.verify(&payload, requirement).await?;
        if !response.is_valid {
            let reason = response
                .invalid_reason
                .unwrap_or_else(|| "payment is not valid".to_string());
            warn!("Payment verification rejected: {}", reason);
            return Err(GateError::VerificationRejected {
                reason,
                payer: response.payer,
            });
        }

        Ok(VerifiedPayment {
            payload,
            payer: response.payer,
        })
    }

    /// Finalize the on-chain transfer for an already-verified proof.
    /// Blocking from the caller's perspective; the guarded action must wait
    /// for the receipt. Returns the `X-PAYMENT-RESPONSE` header value.
    pub async fn settle(
        &self,
        payment_header: &str,
        requirement: &PaymentRequirements,
    ) -> Result<String, GateError> {
        let payload = decode_payment(payment_header)?;
        let response = self.facilitator.settle(&payload, requirement).await?;

        if !response.success {
            let reason = response
                .error_reason
                .unwrap_or_else(|| "settlement failed".to_string());
            return Err(GateError::SettlementRejected { reason });
        }

        info!(
            "Payment settled on {} (tx {})",
            response.network.as_deref().unwrap_or(&self.network),
            response.transaction.as_deref().unwrap_or("unknown")
        );
        settle_response_header(&response)
    }
}

/// Pick the requirement matching the proof's scheme and network, falling
/// back to the first candidate.
fn select_requirement<'a>(
    accepts: &'a [PaymentRequirements],
    payload: &PaymentPayload,
) -> Result<&'a PaymentRequirements, GateError> {
    accepts
        .iter()
        .find(|r| r.scheme == payload.scheme && r.network == payload.network)
        .or_else(|| accepts.first())
        .ok_or_else(|| GateError::VerificationRejected {
            reason: "no payment requirements offered".to_string(),
            payer: None,
        })
}
