//! Payment gateway integration.
//!
//! The gateway creates orders for the amount a guest pays by card, signs
//! completed payments, reports what an order was opened for, and issues
//! refunds. Refunds carry an idempotency key so a retried request after a
//! lost response cannot pay out twice. [`HttpPaymentGateway`] talks to a
//! Razorpay-compatible REST API; tests use
//! [`crate::mocks::MockPaymentGateway`].

use crate::config::GatewayConfig;
use crate::types::{Money, PaymentConfirmation};
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Boxed `Send` future resolving to a gateway result.
pub type GatewayFuture<'a, T> = BoxFuture<'a, Result<T, GatewayError>>;

/// Payment gateway failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Gateway refused the request (4xx)
    #[error("gateway rejected request: {reason}")]
    Rejected {
        /// Gateway-supplied reason
        reason: String,
    },
    /// Request did not complete in time
    #[error("gateway timeout")]
    Timeout,
    /// Connection or 5xx failure
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// Response body did not match the expected shape
    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether a retry may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// An order the client completes through the gateway checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrder {
    /// Gateway order id
    pub order_id: String,
    /// Order amount
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Merchant receipt reference
    pub receipt: String,
}

/// Payment gateway abstraction.
pub trait PaymentGateway: Send + Sync {
    /// Create an order for `amount`.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`].
    fn create_order(&self, amount: Money, receipt: String) -> GatewayFuture<'_, PaymentOrder>;

    /// Load an order as the gateway recorded it.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Rejected`] for an unknown order, or any other
    /// [`GatewayError`].
    fn fetch_order(&self, order_id: String) -> GatewayFuture<'_, PaymentOrder>;

    /// Check the signature the checkout returned for a completed payment.
    fn verify_signature(&self, confirmation: &PaymentConfirmation) -> bool;

    /// Refund `amount` of a captured payment; returns the refund id.
    ///
    /// Requests sharing `idempotency_key` issue one refund and return its id.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`].
    fn refund(
        &self,
        payment_id: String,
        amount: Money,
        idempotency_key: String,
    ) -> GatewayFuture<'_, String>;
}

/// HMAC-SHA256 signer/verifier for `order_id|payment_id`.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    /// Create a verifier for a shared secret.
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, order_id: &str, payment_id: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(order_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        Some(mac)
    }

    /// Hex signature the gateway would produce for this payment.
    #[must_use]
    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        self.mac(order_id, payment_id)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Constant-time comparison of the submitted signature.
    #[must_use]
    pub fn verify(&self, confirmation: &PaymentConfirmation) -> bool {
        let Ok(submitted) = hex::decode(confirmation.signature.trim()) else {
            return false;
        };
        self.mac(&confirmation.order_id, &confirmation.payment_id)
            .is_some_and(|mac| mac.verify_slice(&submitted).is_ok())
    }
}

// ============================================================================
// HTTP gateway
// ============================================================================

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    amount: u64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    amount: u64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    amount: u64,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    description: String,
}

/// Razorpay-compatible REST client.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    currency: String,
    verifier: SignatureVerifier,
}

impl HttpPaymentGateway {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            currency: config.currency.clone(),
            verifier: SignatureVerifier::new(&config.key_secret),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        self.send(self.client.post(format!("{}{path}", self.base_url)).json(body))
            .await
    }

    async fn get<R>(&self, path: &str) -> Result<R, GatewayError>
    where
        R: for<'de> Deserialize<'de>,
    {
        self.send(self.client.get(format!("{}{path}", self.base_url)))
            .await
    }

    async fn send<R>(&self, request: reqwest::RequestBuilder) -> Result<R, GatewayError>
    where
        R: for<'de> Deserialize<'de>,
    {
        let response = request
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!("status {status}")));
        }
        if status.is_client_error() {
            let reason = response
                .json::<ErrorEnvelope>()
                .await
                .map_or_else(|_| format!("status {status}"), |e| e.error.description);
            return Err(GatewayError::Rejected { reason });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

impl From<OrderResponse> for PaymentOrder {
    fn from(order: OrderResponse) -> Self {
        Self {
            order_id: order.id,
            amount: Money::from_minor(order.amount),
            currency: order.currency,
            receipt: order.receipt.unwrap_or_default(),
        }
    }
}

impl PaymentGateway for HttpPaymentGateway {
    fn create_order(&self, amount: Money, receipt: String) -> GatewayFuture<'_, PaymentOrder> {
        Box::pin(async move {
            let body = CreateOrderBody {
                amount: amount.minor(),
                currency: &self.currency,
                receipt: &receipt,
            };
            let order: OrderResponse = self.post("/v1/orders", &body).await?;
            tracing::info!(order_id = %order.id, amount = %amount, "Gateway order created");

            let mut order = PaymentOrder::from(order);
            if order.receipt.is_empty() {
                order.receipt = receipt;
            }
            Ok(order)
        })
    }

    fn fetch_order(&self, order_id: String) -> GatewayFuture<'_, PaymentOrder> {
        Box::pin(async move {
            let order: OrderResponse = self.get(&format!("/v1/orders/{order_id}")).await?;
            Ok(order.into())
        })
    }

    fn verify_signature(&self, confirmation: &PaymentConfirmation) -> bool {
        self.verifier.verify(confirmation)
    }

    fn refund(
        &self,
        payment_id: String,
        amount: Money,
        idempotency_key: String,
    ) -> GatewayFuture<'_, String> {
        Box::pin(async move {
            let url = format!("{}/v1/payments/{payment_id}/refund", self.base_url);
            let body = RefundBody {
                amount: amount.minor(),
                receipt: &idempotency_key,
            };
            let refund: RefundResponse = self
                .send(
                    self.client
                        .post(url)
                        .header("Idempotency-Key", &idempotency_key)
                        .json(&body),
                )
                .await?;
            tracing::info!(%payment_id, refund_id = %refund.id, "Gateway refund issued");
            Ok(refund.id)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn confirmation(signature: String) -> PaymentConfirmation {
        PaymentConfirmation {
            order_id: "order_Mx1".to_string(),
            payment_id: "pay_Qz9".to_string(),
            signature,
        }
    }

    #[test]
    fn own_signature_verifies() {
        let verifier = SignatureVerifier::new("whsec_test");
        let signature = verifier.sign("order_Mx1", "pay_Qz9");

        assert_eq!(signature.len(), 64);
        assert!(verifier.verify(&confirmation(signature)));
    }

    #[test]
    fn tampered_or_foreign_signatures_fail() {
        let verifier = SignatureVerifier::new("whsec_test");
        let other = SignatureVerifier::new("another_secret");

        assert!(!verifier.verify(&confirmation(other.sign("order_Mx1", "pay_Qz9"))));
        assert!(!verifier.verify(&confirmation(verifier.sign("order_Mx1", "pay_Other"))));
        assert!(!verifier.verify(&confirmation("not-hex".to_string())));
    }

    #[test]
    fn order_response_maps_minor_units() {
        let order: OrderResponse = serde_json::from_value(serde_json::json!({
            "id": "order_Mx1",
            "amount": 315_000,
            "currency": "INR",
        }))
        .unwrap();

        let order = PaymentOrder::from(order);

        assert_eq!(order.amount, Money::from_major(3150));
        assert_eq!(order.receipt, "");
    }

    #[test]
    fn only_timeouts_and_outages_are_retryable() {
        assert!(GatewayError::Timeout.is_retryable());
        assert!(GatewayError::Unavailable("502".to_string()).is_retryable());
        let rejected = GatewayError::Rejected {
            reason: "already refunded".to_string(),
        };
        assert!(!rejected.is_retryable());
    }
}
