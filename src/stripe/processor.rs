//! Typed routing of Stripe events to billing logic
//!
//! ```text
//! stored payload ──▶ StripeEvent::from_value ──▶ typed_event_type()
//!                                                      │
//!        ┌───────────────┬──────────────┬──────────────┼───────────────┐
//!        ▼               ▼              ▼              ▼               ▼
//!  on_subscription_*  on_invoice_*  on_customer_*  on_payment_intent_*  Unknown (ignored)
//! ```
//!
//! [`SubscriptionHandler`] is the business seam and returns `anyhow::Result`
//! so implementations can use whatever error types they like. Any handler
//! error becomes [`Error::ProcessingFailed`] and is retried; an object that
//! cannot be parsed is [`Error::InvalidPayload`] and is not.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::inbound::EventHandler;
use crate::stripe::events::{
    CustomerEvent, InvoiceEvent, PaymentIntentEvent, StripeEvent, StripeEventType,
    SubscriptionEvent,
};

/// Billing reactions to Stripe events
#[async_trait]
pub trait SubscriptionHandler: Send + Sync + 'static {
    /// New subscription
    async fn on_subscription_created(&self, event: &SubscriptionEvent) -> anyhow::Result<()>;

    /// Plan, status or cancellation change
    async fn on_subscription_updated(&self, event: &SubscriptionEvent) -> anyhow::Result<()>;

    /// Subscription ended
    async fn on_subscription_deleted(&self, event: &SubscriptionEvent) -> anyhow::Result<()>;

    /// Invoice paid
    async fn on_payment_succeeded(&self, event: &InvoiceEvent) -> anyhow::Result<()>;

    /// Invoice payment failed (dunning)
    async fn on_payment_failed(&self, event: &InvoiceEvent) -> anyhow::Result<()>;

    /// New customer
    async fn on_customer_created(&self, event: &CustomerEvent) -> anyhow::Result<()>;

    /// Invoice finalized
    async fn on_invoice_finalized(&self, _event: &InvoiceEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// One-off payment succeeded
    async fn on_payment_intent_succeeded(&self, _event: &PaymentIntentEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// One-off payment failed
    async fn on_payment_intent_failed(&self, _event: &PaymentIntentEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// [`EventHandler`] that parses Stripe payloads and dispatches by type
pub struct StripeEventRouter<H: SubscriptionHandler + ?Sized> {
    handler: Arc<H>,
}

impl<H: SubscriptionHandler + ?Sized> StripeEventRouter<H> {
    /// Router delivering to `handler`
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Dispatch an already-parsed event
    pub async fn dispatch(&self, event: &StripeEvent) -> Result<()> {
        let handler = &self.handler;
        let result = match event.typed_event_type() {
            StripeEventType::SubscriptionCreated => {
                handler.on_subscription_created(&event.as_subscription()?).await
            }
            StripeEventType::SubscriptionUpdated => {
                handler.on_subscription_updated(&event.as_subscription()?).await
            }
            StripeEventType::SubscriptionDeleted => {
                handler.on_subscription_deleted(&event.as_subscription()?).await
            }
            StripeEventType::InvoicePaid => handler.on_payment_succeeded(&event.as_invoice()?).await,
            StripeEventType::InvoicePaymentFailed => {
                handler.on_payment_failed(&event.as_invoice()?).await
            }
            StripeEventType::InvoiceFinalized => {
                handler.on_invoice_finalized(&event.as_invoice()?).await
            }
            StripeEventType::CustomerCreated => {
                handler.on_customer_created(&event.as_customer()?).await
            }
            StripeEventType::PaymentIntentSucceeded => {
                handler
                    .on_payment_intent_succeeded(&event.as_payment_intent()?)
                    .await
            }
            StripeEventType::PaymentIntentFailed => {
                handler
                    .on_payment_intent_failed(&event.as_payment_intent()?)
                    .await
            }
            StripeEventType::Unknown => {
                debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Ignoring unhandled event type"
                );
                Ok(())
            }
        };
        result.map_err(|e| Error::ProcessingFailed(format!("{e:#}")))
    }
}

#[async_trait]
impl<H: SubscriptionHandler + ?Sized> EventHandler for StripeEventRouter<H> {
    async fn handle(&self, _event_type: &str, payload: &serde_json::Value) -> Result<()> {
        let event = StripeEvent::from_value(payload)?;
        self.dispatch(&event).await
    }
}

/// Handler that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHandler;

#[async_trait]
impl SubscriptionHandler for NoOpHandler {
    async fn on_subscription_created(&self, _event: &SubscriptionEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_subscription_updated(&self, _event: &SubscriptionEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_subscription_deleted(&self, _event: &SubscriptionEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_payment_succeeded(&self, _event: &InvoiceEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_payment_failed(&self, _event: &InvoiceEvent) -> anyhow::Result<()> {
        Ok(())
    }
    async fn on_customer_created(&self, _event: &CustomerEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handler that logs each event; the binary's default
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl SubscriptionHandler for LoggingHandler {
    async fn on_subscription_created(&self, event: &SubscriptionEvent) -> anyhow::Result<()> {
        info!(
            subscription_id = %event.subscription.id,
            customer_id = %event.subscription.customer,
            status = ?event.subscription.status,
            "Subscription created"
        );
        Ok(())
    }

    async fn on_subscription_updated(&self, event: &SubscriptionEvent) -> anyhow::Result<()> {
        info!(
            subscription_id = %event.subscription.id,
            customer_id = %event.subscription.customer,
            status = ?event.subscription.status,
            cancel_at_period_end = event.subscription.cancel_at_period_end,
            "Subscription updated"
        );
        Ok(())
    }

    async fn on_subscription_deleted(&self, event: &SubscriptionEvent) -> anyhow::Result<()> {
        info!(
            subscription_id = %event.subscription.id,
            customer_id = %event.subscription.customer,
            "Subscription deleted"
        );
        Ok(())
    }

    async fn on_payment_succeeded(&self, event: &InvoiceEvent) -> anyhow::Result<()> {
        info!(
            invoice_id = %event.invoice.id,
            customer_id = %event.invoice.customer,
            amount_paid = event.invoice.amount_paid,
            currency = %event.invoice.currency,
            "Payment succeeded"
        );
        Ok(())
    }

    async fn on_payment_failed(&self, event: &InvoiceEvent) -> anyhow::Result<()> {
        warn!(
            invoice_id = %event.invoice.id,
            customer_id = %event.invoice.customer,
            amount_due = event.invoice.amount_due,
            attempt_count = event.invoice.attempt_count,
            "Payment failed"
        );
        Ok(())
    }

    async fn on_customer_created(&self, event: &CustomerEvent) -> anyhow::Result<()> {
        info!(customer_id = %event.customer.id, "Customer created");
        Ok(())
    }

    async fn on_payment_intent_failed(&self, event: &PaymentIntentEvent) -> anyhow::Result<()> {
        warn!(
            payment_intent_id = %event.payment_intent.id,
            amount = event.payment_intent.amount,
            "Payment intent failed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        created: AtomicU32,
        updated: AtomicU32,
        deleted: AtomicU32,
        paid: AtomicU32,
        payment_failed: AtomicU32,
        customers: AtomicU32,
        should_fail: AtomicBool,
    }

    #[async_trait]
    impl SubscriptionHandler for CountingHandler {
        async fn on_subscription_created(&self, _event: &SubscriptionEvent) -> anyhow::Result<()> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                anyhow::bail!("billing database unavailable");
            }
            Ok(())
        }
        async fn on_subscription_updated(&self, _event: &SubscriptionEvent) -> anyhow::Result<()> {
            self.updated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn on_subscription_deleted(&self, _event: &SubscriptionEvent) -> anyhow::Result<()> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn on_payment_succeeded(&self, _event: &InvoiceEvent) -> anyhow::Result<()> {
            self.paid.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn on_payment_failed(&self, _event: &InvoiceEvent) -> anyhow::Result<()> {
            self.payment_failed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn on_customer_created(&self, _event: &CustomerEvent) -> anyhow::Result<()> {
            self.customers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn subscription_payload(event_type: &str) -> serde_json::Value {
        json!({
            "id": "evt_test_123",
            "type": event_type,
            "created": 1614556800,
            "data": {"object": {
                "id": "sub_test_123",
                "customer": "cus_test_123",
                "status": "active"
            }}
        })
    }

    #[tokio::test]
    async fn test_routes_subscription_events() {
        let handler = Arc::new(CountingHandler::default());
        let router = StripeEventRouter::new(handler.clone());

        for event_type in [
            "customer.subscription.created",
            "customer.subscription.updated",
            "customer.subscription.deleted",
        ] {
            router
                .handle(event_type, &subscription_payload(event_type))
                .await
                .unwrap();
        }

        assert_eq!(handler.created.load(Ordering::SeqCst), 1);
        assert_eq!(handler.updated.load(Ordering::SeqCst), 1);
        assert_eq!(handler.deleted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_routes_invoice_aliases() {
        let handler = Arc::new(CountingHandler::default());
        let router = StripeEventRouter::new(handler.clone());

        for event_type in ["invoice.paid", "invoice.payment_succeeded", "invoice.payment_failed"] {
            let payload = json!({
                "id": "evt_inv",
                "type": event_type,
                "data": {"object": {"id": "in_1", "customer": "cus_1"}}
            });
            router.handle(event_type, &payload).await.unwrap();
        }

        assert_eq!(handler.paid.load(Ordering::SeqCst), 2);
        assert_eq!(handler.payment_failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_event_type_ignored() {
        let handler = Arc::new(CountingHandler::default());
        let router = StripeEventRouter::new(handler.clone());
        let payload = json!({
            "id": "evt_unknown_123",
            "type": "charge.refunded",
            "data": {"object": {}}
        });

        router.handle("charge.refunded", &payload).await.unwrap();
        assert_eq!(handler.created.load(Ordering::SeqCst), 0);
        assert_eq!(handler.customers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_failure_is_retriable() {
        let handler = Arc::new(CountingHandler::default());
        handler.should_fail.store(true, Ordering::SeqCst);
        let router = StripeEventRouter::new(handler.clone());

        let err = router
            .handle(
                "customer.subscription.created",
                &subscription_payload("customer.subscription.created"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProcessingFailed(ref m) if m.contains("billing database")));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_malformed_object_is_not_retriable() {
        let router = StripeEventRouter::new(Arc::new(NoOpHandler));
        let payload = json!({
            "id": "evt_1",
            "type": "invoice.payment_failed",
            "data": {"object": {"id": "in_1"}}
        });

        let err = router.handle("invoice.payment_failed", &payload).await.unwrap_err();
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_logging_handler_accepts_everything() {
        let router = StripeEventRouter::new(Arc::new(LoggingHandler));
        router
            .handle(
                "customer.subscription.updated",
                &subscription_payload("customer.subscription.updated"),
            )
            .await
            .unwrap();
    }
}
