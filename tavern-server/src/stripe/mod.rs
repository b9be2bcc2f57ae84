//! Payment provider seam
//!
//! The referral service only needs a handful of Stripe operations; they sit
//! behind [`PaymentGateway`] so the webhook logic can be exercised without
//! the network.

mod client;
pub mod webhook;

pub use client::{parse_checkout_session, StripeClient};

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Metadata `type` on promotion codes handed out as referral codes
pub const METADATA_TYPE_REFERRAL: &str = "referral";
/// Metadata `type` on promotion codes issued as referrer rewards
pub const METADATA_TYPE_REFERRAL_REWARD: &str = "referral_reward";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Stripe request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stripe returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected Stripe response: {0}")]
    Decode(String),

    #[error("Stripe is not configured")]
    NotConfigured,
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// A completed checkout, with discounts and payment method already resolved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub customer: Option<String>,
    /// Application user id passed when the checkout was created
    pub client_reference_id: Option<String>,
    pub amount_total: Option<i64>,
    /// Promotion code ids applied to the purchase
    pub promotion_codes: Vec<String>,
    /// Fingerprint of the card that paid, when paid by card
    pub card_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromotionCode {
    pub id: String,
    pub code: String,
    pub coupon_id: String,
    pub metadata: HashMap<String, String>,
}

impl PromotionCode {
    pub fn metadata_type(&self) -> Option<&str> {
        self.metadata.get("type").map(String::as_str)
    }
}

/// One-time percentage coupon
#[derive(Debug, Clone, PartialEq)]
pub struct NewCoupon {
    pub name: String,
    pub percent_off: u32,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPromotionCode {
    pub coupon_id: String,
    /// Customer-facing code; the provider generates one when absent
    pub code: Option<String>,
    /// Restrict redemption to this customer
    pub customer: Option<String>,
    pub max_redemptions: Option<u32>,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a coupon; returns its id
    async fn create_coupon(&self, coupon: &NewCoupon) -> GatewayResult<String>;

    async fn create_promotion_code(&self, promo: &NewPromotionCode) -> GatewayResult<PromotionCode>;

    async fn promotion_code(&self, id: &str) -> GatewayResult<PromotionCode>;

    async fn checkout_session(&self, id: &str) -> GatewayResult<CheckoutSession>;
}

/// Gateway used when no Stripe key is configured
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_coupon(&self, _coupon: &NewCoupon) -> GatewayResult<String> {
        Err(GatewayError::NotConfigured)
    }

    async fn create_promotion_code(&self, _promo: &NewPromotionCode) -> GatewayResult<PromotionCode> {
        Err(GatewayError::NotConfigured)
    }

    async fn promotion_code(&self, _id: &str) -> GatewayResult<PromotionCode> {
        Err(GatewayError::NotConfigured)
    }

    async fn checkout_session(&self, _id: &str) -> GatewayResult<CheckoutSession> {
        Err(GatewayError::NotConfigured)
    }
}
