use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Protocol version carried in every 402 body and facilitator request.
pub const X402_VERSION: u8 = 1;

/// What must be paid for one specific resource: the "accepts" entry handed
/// to clients in a 402 and the requirement verified/settled against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Amount in the asset's atomic units, as a decimal string.
    pub max_amount_required: String,
    pub resource: String,
    pub description: String,
    pub mime_type: String,
    pub pay_to: String,
    /// Advisory settlement window passed through to the client; this layer
    /// does not enforce it.
    pub max_timeout_seconds: u64,
    /// Asset contract address.
    pub asset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub extra: Eip712Domain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
}

/// The one asset this service accepts, per supported network.
#[derive(Debug, Clone, Copy)]
pub struct AssetInfo {
    pub address: &'static str,
    pub decimals: u32,
    pub chain_id: &'static str,
    pub eip712_name: &'static str,
    pub eip712_version: &'static str,
}

pub fn usdc_for_network(network: &str) -> Result<AssetInfo, GateError> {
    match network {
        "base-sepolia" => Ok(AssetInfo {
            address: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            decimals: 6,
            chain_id: "84532",
            eip712_name: "USDC",
            eip712_version: "2",
        }),
        "base" => Ok(AssetInfo {
            address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            decimals: 6,
            chain_id: "8453",
            eip712_name: "USD Coin",
            eip712_version: "2",
        }),
        other => Err(GateError::UnsupportedNetwork(other.to_string())),
    }
}

/// Convert a USD-denominated price to the asset's atomic units.
/// Fails when the amount is negative or needs more precision than the
/// asset carries (e.g. a tenth of a micro-dollar for 6-decimal USDC).
pub fn price_to_atomic(price: Decimal, decimals: u32) -> Result<String, GateError> {
    if price.is_sign_negative() {
        return Err(GateError::PriceConversion(format!(
            "price {} is negative",
            price
        )));
    }
    let scale = Decimal::from(10u64.pow(decimals));
    let scaled = price
        .checked_mul(scale)
        .ok_or_else(|| GateError::PriceConversion(format!("price {} overflows", price)))?;
    if !scaled.fract().is_zero() {
        return Err(GateError::PriceConversion(format!(
            "price {} is not a whole number of atomic units",
            price
        )));
    }
    Ok(scaled.trunc().normalize().to_string())
}

pub fn build_requirements(
    price: Decimal,
    network: &str,
    pay_to: &str,
    resource: &str,
    description: &str,
) -> Result<PaymentRequirements, GateError> {
    let asset = usdc_for_network(network)?;
    let max_amount_required = price_to_atomic(price, asset.decimals)?;

    Ok(PaymentRequirements {
        scheme: "exact".to_string(),
        network: network.to_string(),
        max_amount_required,
        resource: resource.to_string(),
        description: description.to_string(),
        mime_type: String::new(),
        pay_to: pay_to.to_string(),
        max_timeout_seconds: 120,
        asset: asset.address.to_string(),
        output_schema: None,
        extra: Eip712Domain {
            name: asset.eip712_name.to_string(),
            version: asset.eip712_version.to_string(),
        },
    })
}
