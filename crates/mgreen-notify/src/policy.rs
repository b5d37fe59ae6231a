//! Delivery-time policy — pure decision logic, separated from the consumer
//! loop so it can be tested without a queue or a clock.

use chrono::{DateTime, Utc};
use mgreen_core::types::parse_deliver_at;
use std::time::Duration;

/// What to do with a message at consumption time. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryDecision {
    /// `deliver_at` is in the future — suspend this message (and the topic
    /// behind it) until due.
    Wait(Duration),
    /// Due now, or within the grace window past due.
    Forward,
    /// Past due beyond the grace window — deliver anyway, but warn.
    /// Overdue messages are never silently dropped.
    ForwardLate,
}

/// Decide from the raw `deliver_at` field. An unparseable timestamp degrades
/// to immediate delivery for that message; the field is malformed, the
/// message is not.
pub fn decide(deliver_at: Option<&str>, now: DateTime<Utc>, grace: Duration) -> DeliveryDecision {
    let Some(raw) = deliver_at else {
        return DeliveryDecision::Forward;
    };
    let Some(at) = parse_deliver_at(raw) else {
        tracing::warn!("Unparseable deliver_at '{raw}', delivering immediately");
        return DeliveryDecision::Forward;
    };
    decide_at(at, now, grace)
}

fn decide_at(at: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> DeliveryDecision {
    let delay = at - now;
    if delay > chrono::Duration::zero() {
        return DeliveryDecision::Wait(delay.to_std().unwrap_or_default());
    }
    let overdue = -delay;
    if overdue.to_std().unwrap_or_default() <= grace {
        DeliveryDecision::Forward
    } else {
        DeliveryDecision::ForwardLate
    }
}
