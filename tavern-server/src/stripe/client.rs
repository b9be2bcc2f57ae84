//! Stripe REST client (form-encoded requests, JSON responses)

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use super::{
    CheckoutSession, GatewayError, GatewayResult, NewCoupon, NewPromotionCode, PaymentGateway,
    PromotionCode,
};

const API_BASE: &str = "https://api.stripe.com";
const API_VERSION: &str = "2024-06-20";

pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCoupon {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawPromotionCode {
    id: String,
    code: String,
    coupon: Value,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    id: String,
    #[serde(default)]
    customer: Option<Value>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    total_details: Option<Value>,
    #[serde(default)]
    discounts: Option<Vec<Value>>,
    #[serde(default)]
    payment_intent: Option<Value>,
    /// Subscription-mode checkouts pay through the subscription, not a payment intent
    #[serde(default)]
    subscription: Option<Value>,
    #[serde(default)]
    setup_intent: Option<Value>,
}

/// Expandable fields arrive either as an id string or as the expanded object
fn expandable_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Card fingerprint from whichever expanded object carries the payment method
fn card_fingerprint(raw: &RawCheckoutSession) -> Option<String> {
    [
        (&raw.payment_intent, "/payment_method/card/fingerprint"),
        (&raw.subscription, "/default_payment_method/card/fingerprint"),
        (&raw.setup_intent, "/payment_method/card/fingerprint"),
    ]
    .into_iter()
    .find_map(|(object, pointer)| object.as_ref()?.pointer(pointer)?.as_str())
    .map(str::to_string)
}

/// Decode a checkout session object as returned by the Stripe API
pub fn parse_checkout_session(value: Value) -> GatewayResult<CheckoutSession> {
    serde_json::from_value::<RawCheckoutSession>(value)
        .map(CheckoutSession::from)
        .map_err(|e| GatewayError::Decode(e.to_string()))
}

impl From<RawPromotionCode> for PromotionCode {
    fn from(raw: RawPromotionCode) -> Self {
        Self {
            id: raw.id,
            code: raw.code,
            coupon_id: expandable_id(&raw.coupon).unwrap_or_default(),
            metadata: raw.metadata,
        }
    }
}

impl From<RawCheckoutSession> for CheckoutSession {
    fn from(raw: RawCheckoutSession) -> Self {
        let card_fingerprint = card_fingerprint(&raw);
        let mut promotion_codes: Vec<String> = Vec::new();
        let mut push_unique = |id: String| {
            if !promotion_codes.contains(&id) {
                promotion_codes.push(id);
            }
        };

        let breakdown = raw
            .total_details
            .as_ref()
            .and_then(|t| t.pointer("/breakdown/discounts"))
            .and_then(Value::as_array);
        for entry in breakdown.into_iter().flatten() {
            if let Some(id) = entry.pointer("/discount/promotion_code").and_then(expandable_id) {
                push_unique(id);
            }
        }
        for entry in raw.discounts.iter().flatten() {
            if let Some(id) = entry.get("promotion_code").and_then(expandable_id) {
                push_unique(id);
            }
        }

        Self {
            id: raw.id,
            customer: raw.customer.as_ref().and_then(expandable_id),
            client_reference_id: raw.client_reference_id,
            amount_total: raw.amount_total,
            promotion_codes,
            card_fingerprint,
        }
    }
}

fn metadata_params(params: &mut Vec<(String, String)>, metadata: &HashMap<String, String>) {
    for (key, value) in metadata {
        params.push((format!("metadata[{}]", key), value.clone()));
    }
}

impl StripeClient {
    pub fn new(http: reqwest::Client, secret_key: impl Into<String>) -> Self {
        Self {
            http,
            secret_key: secret_key.into(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Point at a different API host (stripe-mock, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> GatewayResult<T> {
        let response = request
            .bearer_auth(&self.secret_key)
            .header("Stripe-Version", API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .map(|e| {
                    format!(
                        "{} ({})",
                        e.error.message.unwrap_or_default(),
                        e.error.kind.unwrap_or_else(|| "unknown".to_string())
                    )
                })
                .unwrap_or(body);
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> GatewayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(path, "Stripe POST");
        self.send(self.http.post(url).form(params)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> GatewayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(path, "Stripe GET");
        self.send(self.http.get(url).query(query)).await
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_coupon(&self, coupon: &NewCoupon) -> GatewayResult<String> {
        let mut params = vec![
            ("name".to_string(), coupon.name.clone()),
            ("percent_off".to_string(), coupon.percent_off.to_string()),
            ("duration".to_string(), "once".to_string()),
        ];
        metadata_params(&mut params, &coupon.metadata);

        let created: RawCoupon = self.post_form("/v1/coupons", &params).await?;
        Ok(created.id)
    }

    async fn create_promotion_code(&self, promo: &NewPromotionCode) -> GatewayResult<PromotionCode> {
        let mut params = vec![("coupon".to_string(), promo.coupon_id.clone())];
        if let Some(code) = &promo.code {
            params.push(("code".to_string(), code.clone()));
        }
        if let Some(customer) = &promo.customer {
            params.push(("customer".to_string(), customer.clone()));
        }
        if let Some(max) = promo.max_redemptions {
            params.push(("max_redemptions".to_string(), max.to_string()));
        }
        metadata_params(&mut params, &promo.metadata);

        let created: RawPromotionCode = self.post_form("/v1/promotion_codes", &params).await?;
        Ok(created.into())
    }

    async fn promotion_code(&self, id: &str) -> GatewayResult<PromotionCode> {
        let raw: RawPromotionCode = self.get(&format!("/v1/promotion_codes/{}", id), &[]).await?;
        Ok(raw.into())
    }

    async fn checkout_session(&self, id: &str) -> GatewayResult<CheckoutSession> {
        let raw: RawCheckoutSession = self
            .get(
                &format!("/v1/checkout/sessions/{}", id),
                &[
                    ("expand[]", "total_details.breakdown"),
                    ("expand[]", "payment_intent.payment_method"),
                    ("expand[]", "subscription.default_payment_method"),
                    ("expand[]", "setup_intent.payment_method"),
                ],
            )
            .await?;
        Ok(raw.into())
    }
}
