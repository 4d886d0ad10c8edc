//! Clipper Webhooks - Event Delivery & Retry Subsystem
//!
//! Receives signed provider webhooks exactly once, fans internal domain events
//! out to subscriber endpoints with signed HTTP deliveries, and retries
//! failures with capped exponential backoff until they succeed or land in a
//! dead-letter queue.
//!
//! # Architecture
//!
//! ```text
//! Stripe ──▶ POST /webhooks/stripe ──▶ IdempotencyGuard ──▶ EventHandler
//!                                                               │ failure
//!                                                               ▼
//! OutboundDispatcher ──▶ DeliveryExecutor ──failure──▶ RetryQueue ◀── RetryScheduler
//!                                                               │ exhausted
//!                                                               ▼
//!                                                        DeadLetterRouter
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clipper_webhooks::{WebhookConfig, WebhookService};
//! use clipper_webhooks::store::InMemoryStore;
//! use clipper_webhooks::stripe::{LoggingHandler, StripeEventRouter};
//!
//! #[tokio::main]
//! async fn main() -> clipper_webhooks::Result<()> {
//!     let service = Arc::new(WebhookService::new(
//!         WebhookConfig::from_env()?,
//!         Arc::new(InMemoryStore::new()),
//!         Arc::new(StripeEventRouter::new(Arc::new(LoggingHandler))),
//!     )?);
//!
//!     let scheduler = Arc::new(service.scheduler()).start();
//!     // ... serve clipper_webhooks::handlers::router(...)
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backoff;
pub mod config;
pub mod dead_letter;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod inbound;
pub mod metrics;
pub mod model;
pub mod outbound;
pub mod scheduler;
pub mod security;
pub mod service;
pub mod signature;
pub mod store;
pub mod stripe;

// Re-exports for convenience
pub use backoff::BackoffPolicy;
pub use config::WebhookConfig;
pub use dead_letter::DeadLetterRouter;
pub use delivery::{DeliveryExecutor, DeliveryPolicy};
pub use error::{Error, Result, SignatureError, StorageError};
pub use inbound::{EventHandler, InboundOutcome, InboundProcessor};
pub use metrics::{HealthReporter, HealthSnapshot, WebhookMetrics};
pub use model::{
    DeadLetterItem, DeliveryAttemptRecord, DeliveryOutcome, FailureKind, InboundEvent,
    OutboundEvent, OutboundSubscription, RetryQueueItem, RetrySource,
};
pub use outbound::{DispatchReport, OutboundDispatcher};
pub use scheduler::{RetryHandler, RetryScheduler, SchedulerConfig, SchedulerHandle, TickReport};
pub use service::WebhookService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
