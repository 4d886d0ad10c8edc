//! Stripe event envelope and typed payloads
//!
//! Only the fields the billing handlers act on are modelled; everything else in
//! the object stays available through [`StripeEvent::data`]. Object fields are
//! lenient (`#[serde(default)]`) so that an older API version missing a field
//! still routes instead of failing the whole delivery.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stripe event types with a dedicated handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StripeEventType {
    /// `customer.created`
    CustomerCreated,
    /// `customer.subscription.created`
    SubscriptionCreated,
    /// `customer.subscription.updated`
    SubscriptionUpdated,
    /// `customer.subscription.deleted`
    SubscriptionDeleted,
    /// `invoice.paid` or `invoice.payment_succeeded`
    InvoicePaid,
    /// `invoice.payment_failed`
    InvoicePaymentFailed,
    /// `invoice.finalized`
    InvoiceFinalized,
    /// `payment_intent.succeeded`
    PaymentIntentSucceeded,
    /// `payment_intent.payment_failed`
    PaymentIntentFailed,
    /// Anything else; acknowledged and ignored
    Unknown,
}

impl From<&str> for StripeEventType {
    fn from(s: &str) -> Self {
        match s {
            "customer.created" => Self::CustomerCreated,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.paid" | "invoice.payment_succeeded" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "invoice.finalized" => Self::InvoiceFinalized,
            "payment_intent.succeeded" => Self::PaymentIntentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentIntentFailed,
            _ => Self::Unknown,
        }
    }
}

impl FromStr for StripeEventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl StripeEventType {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerCreated => "customer.created",
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::InvoicePaid => "invoice.paid",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::InvoiceFinalized => "invoice.finalized",
            Self::PaymentIntentSucceeded => "payment_intent.succeeded",
            Self::PaymentIntentFailed => "payment_intent.payment_failed",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a handler exists for this type
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Stripe event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeEvent {
    /// Event id (`evt_...`); the idempotency key
    pub id: String,
    /// Event type string
    #[serde(rename = "type")]
    pub event_type: String,
    /// Creation time (unix seconds)
    #[serde(default)]
    pub created: i64,
    /// API version used to render `data`
    #[serde(default)]
    pub api_version: Option<String>,
    /// Live or test mode
    #[serde(default)]
    pub livemode: bool,
    /// Event payload
    pub data: EventData,
}

/// `data` container of an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// The object the event is about
    pub object: serde_json::Value,
    /// Changed fields, on `*.updated` events
    #[serde(default)]
    pub previous_attributes: Option<serde_json::Value>,
}

impl StripeEvent {
    /// Parse a raw request body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let event: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidPayload(format!("not a Stripe event: {e}")))?;
        event.validate()
    }

    /// Parse a stored payload
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let event: Self = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidPayload(format!("not a Stripe event: {e}")))?;
        event.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidPayload("event id is empty".to_string()));
        }
        if self.event_type.trim().is_empty() {
            return Err(Error::InvalidPayload("event type is empty".to_string()));
        }
        Ok(self)
    }

    /// Typed event type
    pub fn typed_event_type(&self) -> StripeEventType {
        StripeEventType::from(self.event_type.as_str())
    }

    fn object<T: serde::de::DeserializeOwned>(&self, kind: &str) -> Result<T> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            Error::InvalidPayload(format!("event {} has no valid {kind}: {e}", self.id))
        })
    }

    /// Subscription payload of a `customer.subscription.*` event
    pub fn as_subscription(&self) -> Result<SubscriptionEvent> {
        Ok(SubscriptionEvent {
            event_id: self.id.clone(),
            event_type: self.typed_event_type(),
            subscription: self.object("subscription")?,
            previous_attributes: self.data.previous_attributes.clone(),
        })
    }

    /// Invoice payload of an `invoice.*` event
    pub fn as_invoice(&self) -> Result<InvoiceEvent> {
        Ok(InvoiceEvent {
            event_id: self.id.clone(),
            event_type: self.typed_event_type(),
            invoice: self.object("invoice")?,
        })
    }

    /// Customer payload of a `customer.created` event
    pub fn as_customer(&self) -> Result<CustomerEvent> {
        Ok(CustomerEvent {
            event_id: self.id.clone(),
            event_type: self.typed_event_type(),
            customer: self.object("customer")?,
        })
    }

    /// Payment intent payload of a `payment_intent.*` event
    pub fn as_payment_intent(&self) -> Result<PaymentIntentEvent> {
        Ok(PaymentIntentEvent {
            event_id: self.id.clone(),
            event_type: self.typed_event_type(),
            payment_intent: self.object("payment intent")?,
        })
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// A subscription event
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    /// Event id
    pub event_id: String,
    /// Which subscription event
    pub event_type: StripeEventType,
    /// The subscription
    pub subscription: Subscription,
    /// Previous values on updates
    pub previous_attributes: Option<serde_json::Value>,
}

/// Stripe subscription object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// `sub_...`
    pub id: String,
    /// `cus_...`
    pub customer: String,
    /// Status
    pub status: SubscriptionStatus,
    /// Current period start (unix seconds)
    #[serde(default)]
    pub current_period_start: Option<i64>,
    /// Current period end (unix seconds)
    #[serde(default)]
    pub current_period_end: Option<i64>,
    /// Cancels when the period ends
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// When cancelled
    #[serde(default)]
    pub canceled_at: Option<i64>,
    /// Trial end
    #[serde(default)]
    pub trial_end: Option<i64>,
    /// Attached metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Unpaid,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Trialing,
    Paused,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Entitles the customer to the paid tier
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// Payment needs attention
    pub fn requires_payment_action(&self) -> bool {
        matches!(self, Self::PastDue | Self::Unpaid | Self::Incomplete)
    }
}

// =============================================================================
// Invoices
// =============================================================================

/// An invoice event
#[derive(Debug, Clone)]
pub struct InvoiceEvent {
    /// Event id
    pub event_id: String,
    /// Which invoice event
    pub event_type: StripeEventType,
    /// The invoice
    pub invoice: Invoice,
}

/// Stripe invoice object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// `in_...`
    pub id: String,
    /// `cus_...`
    pub customer: String,
    /// Related subscription
    #[serde(default)]
    pub subscription: Option<String>,
    /// Status
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    /// Amount due (minor units)
    #[serde(default)]
    pub amount_due: i64,
    /// Amount paid (minor units)
    #[serde(default)]
    pub amount_paid: i64,
    /// ISO currency
    #[serde(default)]
    pub currency: String,
    /// Payment attempts so far
    #[serde(default)]
    pub attempt_count: u32,
    /// Next automatic payment attempt (unix seconds)
    #[serde(default)]
    pub next_payment_attempt: Option<i64>,
    /// Hosted invoice page
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
}

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Uncollectible,
    Void,
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Customers and payment intents
// =============================================================================

/// A customer event
#[derive(Debug, Clone)]
pub struct CustomerEvent {
    /// Event id
    pub event_id: String,
    /// Which customer event
    pub event_type: StripeEventType,
    /// The customer
    pub customer: Customer,
}

/// Stripe customer object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    /// `cus_...`
    pub id: String,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Name
    #[serde(default)]
    pub name: Option<String>,
    /// Attached metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A payment intent event
#[derive(Debug, Clone)]
pub struct PaymentIntentEvent {
    /// Event id
    pub event_id: String,
    /// Which payment intent event
    pub event_type: StripeEventType,
    /// The payment intent
    pub payment_intent: PaymentIntent,
}

/// Stripe payment intent object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// `pi_...`
    pub id: String,
    /// `cus_...`
    #[serde(default)]
    pub customer: Option<String>,
    /// Amount (minor units)
    #[serde(default)]
    pub amount: i64,
    /// ISO currency
    #[serde(default)]
    pub currency: String,
    /// Status string as sent by Stripe
    #[serde(default)]
    pub status: String,
    /// Failure details on `payment_failed`
    #[serde(default)]
    pub last_payment_error: Option<serde_json::Value>,
}
