// Stripe object enums mirror the API's variant names one-to-one
#![allow(missing_docs)]

//! Stripe inbound integration
//!
//! - [`events`]: the event envelope and typed subscription/invoice/customer
//!   payloads
//! - [`processor`]: the [`SubscriptionHandler`] business seam and the
//!   [`StripeEventRouter`] that plugs it into the inbound pipeline
//!
//! Signature verification lives in [`crate::signature::StripeVerifier`] and the
//! HTTP endpoint in [`crate::handlers::webhook`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clipper_webhooks::stripe::{StripeEventRouter, SubscriptionHandler, SubscriptionEvent,
//!     InvoiceEvent, CustomerEvent};
//!
//! struct Billing;
//!
//! #[async_trait::async_trait]
//! impl SubscriptionHandler for Billing {
//!     async fn on_subscription_created(&self, e: &SubscriptionEvent) -> anyhow::Result<()> {
//!         println!("grant premium to {}", e.subscription.customer);
//!         Ok(())
//!     }
//!     async fn on_subscription_updated(&self, _: &SubscriptionEvent) -> anyhow::Result<()> { Ok(()) }
//!     async fn on_subscription_deleted(&self, _: &SubscriptionEvent) -> anyhow::Result<()> { Ok(()) }
//!     async fn on_payment_succeeded(&self, _: &InvoiceEvent) -> anyhow::Result<()> { Ok(()) }
//!     async fn on_payment_failed(&self, _: &InvoiceEvent) -> anyhow::Result<()> { Ok(()) }
//!     async fn on_customer_created(&self, _: &CustomerEvent) -> anyhow::Result<()> { Ok(()) }
//! }
//!
//! let router = StripeEventRouter::new(Arc::new(Billing));
//! ```

pub mod events;
pub mod processor;

pub use events::{
    Customer, CustomerEvent, Invoice, InvoiceEvent, InvoiceStatus, PaymentIntent,
    PaymentIntentEvent, StripeEvent, StripeEventType, Subscription, SubscriptionEvent,
    SubscriptionStatus,
};
pub use processor::{LoggingHandler, NoOpHandler, StripeEventRouter, SubscriptionHandler};
