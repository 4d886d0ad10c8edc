//! Service wiring
//!
//! [`WebhookService`] builds every component from one [`WebhookConfig`] and a
//! storage engine, and acts as the scheduler's [`RetryHandler`] by routing each
//! queued item back through the pipeline it came from.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::WebhookConfig;
use crate::dead_letter::DeadLetterRouter;
use crate::delivery::{DeliveryExecutor, DeliveryPolicy};
use crate::error::Result;
use crate::inbound::{EventHandler, InboundProcessor};
use crate::metrics::{HealthReporter, WebhookMetrics};
use crate::model::{DeadLetterItem, RetryQueueItem, RetrySource};
use crate::outbound::OutboundDispatcher;
use crate::scheduler::{RetryHandler, RetryScheduler, SchedulerConfig};
use crate::signature::StripeVerifier;
use crate::store::{EventStore, QueueStore, SubscriptionStore};

/// All webhook components sharing one store and one set of counters
pub struct WebhookService {
    config: WebhookConfig,
    metrics: Arc<WebhookMetrics>,
    queue: Arc<dyn QueueStore>,
    inbound: InboundProcessor,
    outbound: OutboundDispatcher,
    dead_letters: DeadLetterRouter,
    health: HealthReporter,
    verifier: StripeVerifier,
}

impl WebhookService {
    /// Service over a store implementing every storage trait
    pub fn new<S>(config: WebhookConfig, store: Arc<S>, handler: Arc<dyn EventHandler>) -> Result<Self>
    where
        S: EventStore + QueueStore + SubscriptionStore + 'static,
    {
        Self::from_parts(config, store.clone(), store.clone(), store, handler)
    }

    /// Service over separate stores
    pub fn from_parts(
        config: WebhookConfig,
        events: Arc<dyn EventStore>,
        queue: Arc<dyn QueueStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(WebhookMetrics::new());
        let backoff = config.backoff();
        let dead_letters = DeadLetterRouter::new(
            queue.clone(),
            metrics.clone(),
            config.max_retries,
            config.outbound_max_retries,
        );
        let executor =
            DeliveryExecutor::new(events.clone(), metrics.clone(), DeliveryPolicy::from(&config))?;
        let inbound = InboundProcessor::new(
            events.clone(),
            queue.clone(),
            handler,
            dead_letters.clone(),
            metrics.clone(),
            backoff,
            config.max_retries,
            config.processing_timeout,
            config.claim_lease,
        );
        let outbound = OutboundDispatcher::new(
            subscriptions,
            queue.clone(),
            executor,
            dead_letters.clone(),
            backoff,
            config.outbound_max_retries,
        );
        let health = HealthReporter::new(queue.clone(), events);
        let verifier =
            StripeVerifier::with_secrets(config.stripe_signing_secrets.clone(), config.signature_tolerance);

        Ok(Self {
            config,
            metrics,
            queue,
            inbound,
            outbound,
            dead_letters,
            health,
            verifier,
        })
    }

    /// Scheduler draining the queue through this service.
    ///
    /// Build one per process and start it once.
    pub fn scheduler(self: &Arc<Self>) -> RetryScheduler {
        RetryScheduler::new(
            self.queue.clone(),
            self.clone(),
            self.dead_letters.clone(),
            self.metrics.clone(),
            SchedulerConfig::from(&self.config),
        )
    }

    /// Active configuration
    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// In-process counters
    pub fn metrics(&self) -> &Arc<WebhookMetrics> {
        &self.metrics
    }

    /// Inbound pipeline
    pub fn inbound(&self) -> &InboundProcessor {
        &self.inbound
    }

    /// Outbound fan-out
    pub fn outbound(&self) -> &OutboundDispatcher {
        &self.outbound
    }

    /// Dead-letter inspection and replay
    pub fn dead_letters(&self) -> &DeadLetterRouter {
        &self.dead_letters
    }

    /// Queue health
    pub fn health(&self) -> &HealthReporter {
        &self.health
    }

    /// Inbound signature verifier
    pub fn verifier(&self) -> &StripeVerifier {
        &self.verifier
    }
}

#[async_trait]
impl RetryHandler for WebhookService {
    async fn retry(&self, item: &RetryQueueItem) -> Result<()> {
        match item.source {
            RetrySource::Inbound => self.inbound.retry(item).await,
            RetrySource::Outbound { subscription_id } => {
                self.outbound.retry(item, subscription_id).await
            }
        }
    }

    async fn on_dead_letter(&self, dead: &DeadLetterItem) -> Result<()> {
        match dead.source {
            RetrySource::Inbound => self.inbound.on_dead_letter(dead).await,
            RetrySource::Outbound { .. } => Ok(()),
        }
    }
}
