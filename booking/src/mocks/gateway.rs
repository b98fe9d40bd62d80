use crate::payment_gateway::{
    GatewayError, GatewayFuture, PaymentGateway, PaymentOrder, SignatureVerifier,
};
use crate::types::{Money, PaymentConfirmation};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Secret used by [`MockPaymentGateway::new`]
pub const MOCK_GATEWAY_SECRET: &str = "mock_gateway_secret";

#[derive(Debug, Default)]
struct Recorded {
    orders: Vec<PaymentOrder>,
    refunds: Vec<(String, Money)>,
    refund_ids: HashMap<String, String>,
}

/// Deterministic in-process gateway.
///
/// Orders are numbered `order_mock_1`, `order_mock_2`, ...; refunds
/// `rfnd_mock_1`, ... Refunds are deduplicated by idempotency key like the
/// real gateway. Failures can be queued with
/// [`MockPaymentGateway::fail_next_refunds`] (nothing refunded) and
/// [`MockPaymentGateway::lose_next_refund_responses`] (refunded, but the
/// caller sees a timeout).
#[derive(Clone, Debug)]
pub struct MockPaymentGateway {
    verifier: SignatureVerifier,
    recorded: Arc<Mutex<Recorded>>,
    sequence: Arc<AtomicU64>,
    refund_failures: Arc<AtomicU32>,
    lost_responses: Arc<AtomicU32>,
    refund_failure: GatewayError,
}

impl MockPaymentGateway {
    /// Gateway signing with [`MOCK_GATEWAY_SECRET`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            verifier: SignatureVerifier::new(MOCK_GATEWAY_SECRET),
            recorded: Arc::new(Mutex::new(Recorded::default())),
            sequence: Arc::new(AtomicU64::new(0)),
            refund_failures: Arc::new(AtomicU32::new(0)),
            lost_responses: Arc::new(AtomicU32::new(0)),
            refund_failure: GatewayError::Timeout,
        }
    }

    /// Use `error` for queued refund failures
    #[must_use]
    pub fn with_refund_failure(mut self, error: GatewayError) -> Self {
        self.refund_failure = error;
        self
    }

    /// Fail the next `count` refund attempts before anything is refunded
    pub fn fail_next_refunds(&self, count: u32) {
        self.refund_failures.store(count, Ordering::SeqCst);
    }

    /// Issue the next `count` refunds but answer them with a timeout
    pub fn lose_next_refund_responses(&self, count: u32) {
        self.lost_responses.store(count, Ordering::SeqCst);
    }

    /// A valid confirmation for `order_id`, as the checkout would return it
    #[must_use]
    pub fn confirm(&self, order_id: &str) -> PaymentConfirmation {
        let payment_id = format!("pay_mock_{}", self.next_sequence());
        PaymentConfirmation {
            order_id: order_id.to_string(),
            signature: self.verifier.sign(order_id, &payment_id),
            payment_id,
        }
    }

    /// Orders created so far
    #[must_use]
    pub fn orders(&self) -> Vec<PaymentOrder> {
        self.recorded
            .lock()
            .map(|recorded| recorded.orders.clone())
            .unwrap_or_default()
    }

    /// Refunds issued so far as `(payment_id, amount)`
    #[must_use]
    pub fn refunds(&self) -> Vec<(String, Money)> {
        self.recorded
            .lock()
            .map(|recorded| recorded.refunds.clone())
            .unwrap_or_default()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn recorded(&self) -> Result<MutexGuard<'_, Recorded>, GatewayError> {
        self.recorded
            .lock()
            .map_err(|_| GatewayError::Unavailable("mock poisoned".to_string()))
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_order(&self, amount: Money, receipt: String) -> GatewayFuture<'_, PaymentOrder> {
        Box::pin(async move {
            let order = PaymentOrder {
                order_id: format!("order_mock_{}", self.next_sequence()),
                amount,
                currency: "INR".to_string(),
                receipt,
            };
            self.recorded()?.orders.push(order.clone());
            Ok(order)
        })
    }

    fn fetch_order(&self, order_id: String) -> GatewayFuture<'_, PaymentOrder> {
        Box::pin(async move {
            self.recorded()?
                .orders
                .iter()
                .find(|order| order.order_id == order_id)
                .cloned()
                .ok_or_else(|| GatewayError::Rejected {
                    reason: format!("order {order_id} does not exist"),
                })
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
            if take_one(&self.refund_failures) {
                return Err(self.refund_failure.clone());
            }

            let refund_id = {
                let mut recorded = self.recorded()?;
                if let Some(refund_id) = recorded.refund_ids.get(&idempotency_key) {
                    return Ok(refund_id.clone());
                }
                let refund_id = format!("rfnd_mock_{}", self.next_sequence());
                recorded.refund_ids.insert(idempotency_key, refund_id.clone());
                recorded.refunds.push((payment_id, amount));
                refund_id
            };

            if take_one(&self.lost_responses) {
                return Err(GatewayError::Timeout);
            }
            Ok(refund_id)
        })
    }
}
