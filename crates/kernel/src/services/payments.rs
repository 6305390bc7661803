//! Stripe checkout sessions and webhook verification.

use anyhow::{Context, Result, bail};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Tour, User};

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

pub struct CheckoutService {
    client: reqwest::Client,
    secret_key: String,
    webhook_secret: Option<String>,
    api_base: String,
    site_url: String,
}

impl CheckoutService {
    pub fn new(
        secret_key: String,
        webhook_secret: Option<String>,
        api_base: String,
        site_url: String,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            secret_key,
            webhook_secret,
            api_base: api_base.trim_end_matches('/').to_string(),
            site_url,
        }
    }

    /// None when no secret key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let Some(secret_key) = config.stripe_secret_key.clone() else {
            debug!("STRIPE_SECRET_KEY not set; checkout disabled");
            return None;
        };
        info!(api = %config.stripe_api_base, "payment checkout configured");
        Some(Self::new(
            secret_key,
            config.stripe_webhook_secret.clone(),
            config.stripe_api_base.clone(),
            config.site_url.clone(),
        ))
    }

    /// Create a hosted checkout session for one tour seat.
    pub async fn create_session(&self, tour: &Tour, user: &User) -> Result<Value> {
        let form = session_form(&self.site_url, tour, user);
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .context("checkout request failed")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("checkout response was not JSON")?;
        if !status.is_success() {
            bail!("checkout provider returned {status}: {body}");
        }
        info!(tour = %tour.id, user = %user.id, "checkout session created");
        Ok(body)
    }

    /// Verify a webhook body against its `Stripe-Signature` header.
    pub fn verify_webhook(&self, payload: &[u8], header: &str, now: i64) -> Result<()> {
        let Some(secret) = &self.webhook_secret else {
            bail!("webhook secret not configured");
        };
        verify_signature(payload, header, secret, now)
    }
}

/// Form fields of a checkout session request.
pub fn session_form(site_url: &str, tour: &Tour, user: &User) -> Vec<(String, String)> {
    let unit_amount = (tour.price * 100.0).round() as i64;
    vec![
        ("mode".into(), "payment".into()),
        ("payment_method_types[]".into(), "card".into()),
        ("success_url".into(), format!("{site_url}/my-tours?alert=booking")),
        ("cancel_url".into(), format!("{site_url}/tour/{}", tour.slug)),
        ("customer_email".into(), user.email.clone()),
        ("client_reference_id".into(), tour.id.to_string()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), "usd".into()),
        ("line_items[0][price_data][unit_amount]".into(), unit_amount.to_string()),
        (
            "line_items[0][price_data][product_data][name]".into(),
            format!("{} Tour", tour.name),
        ),
        (
            "line_items[0][price_data][product_data][description]".into(),
            tour.summary.clone(),
        ),
        (
            "line_items[0][price_data][product_data][images][0]".into(),
            format!("{site_url}/static/img/tours/{}", tour.image_cover),
        ),
    ]
}

/// Check a `t=<unix>,v1=<hex hmac>` signature header.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }
    let Some(timestamp) = timestamp else {
        bail!("signature header has no timestamp");
    };
    if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        bail!("signature timestamp outside tolerance");
    }

    let expected = sign(payload, timestamp, secret)?;
    let matched = signatures
        .iter()
        .any(|sig| bool::from(sig.as_bytes().ct_eq(expected.as_bytes())));
    if !matched {
        bail!("no matching signature");
    }
    Ok(())
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn sign(payload: &[u8], timestamp: i64, secret: &str) -> Result<String> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).context("invalid webhook secret")?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: Value,
}

/// A paid checkout, ready to become a booking.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCheckout {
    pub tour: Uuid,
    pub customer_email: String,
    pub price: f64,
}

/// Parse a webhook body; None for event types other than checkout completion.
pub fn parse_completed_checkout(payload: &[u8]) -> Result<Option<CompletedCheckout>> {
    let event: WebhookEvent = serde_json::from_slice(payload).context("malformed webhook event")?;
    if event.kind != CHECKOUT_COMPLETED {
        return Ok(None);
    }
    let session = event.data.object;
    let tour = session
        .get("client_reference_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .context("checkout session has no tour reference")?;
    let customer_email = session
        .get("customer_email")
        .or_else(|| session.pointer("/customer_details/email"))
        .and_then(Value::as_str)
        .context("checkout session has no customer email")?
        .to_lowercase();
    let amount_total = session
        .get("amount_total")
        .and_then(Value::as_f64)
        .context("checkout session has no amount")?;
    Ok(Some(CompletedCheckout {
        tour,
        customer_email,
        price: amount_total / 100.0,
    }))
}

impl std::fmt::Debug for CheckoutService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutService")
            .field("api_base", &self.api_base)
            .field("webhooks", &self.webhook_secret.is_some())
            .finish_non_exhaustive()
    }
}
