//! Event subscriptions on the device side
//!
//! A [`SubscriptionRegistry`] is owned by each service and tracks the
//! subscribers accepted through `SUBSCRIBE`. State changes produce an
//! [`EventBatch`] with one notification per live subscriber; delivering the
//! batch fans out concurrently and never cancels a subscription on failure.

use std::thread;
use std::time::{Duration, Instant};

use soap_client::{envelope, SoapClient, SoapError};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{ApiError, Result};

/// Subscription lifetime when the subscriber does not ask for one.
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: u32 = 1800;

/// One accepted subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    sid: String,
    callbacks: Vec<String>,
    timeout_seconds: u32,
    expires_at: Instant,
    next_seq: u32,
}

impl Subscription {
    fn new(callbacks: Vec<String>, timeout_seconds: u32) -> Self {
        Self {
            sid: format!("uuid:{}", Uuid::new_v4()),
            callbacks,
            timeout_seconds,
            expires_at: expiry(timeout_seconds),
            next_seq: 0,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Callback URLs in the order the subscriber listed them.
    pub fn callbacks(&self) -> &[String] {
        &self.callbacks
    }

    pub fn timeout_seconds(&self) -> u32 {
        self.timeout_seconds
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Take the next event key. Starts at 0, wraps from `u32::MAX` to 1.
    fn take_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = if seq == u32::MAX { 1 } else { seq + 1 };
        seq
    }
}

fn expiry(timeout_seconds: u32) -> Instant {
    Instant::now() + Duration::from_secs(u64::from(timeout_seconds))
}

/// Parse a `CALLBACK` header: one or more `<url>` entries.
///
/// # Errors
///
/// Returns `ApiError::InvalidCallback` when no entry is present or any entry
/// is not an absolute `http` URL.
pub fn parse_callback_header(value: &str) -> Result<Vec<String>> {
    let mut callbacks = Vec::new();
    let mut rest = value.trim();

    while let Some(start) = rest.find('<') {
        let end = rest[start..]
            .find('>')
            .map(|offset| start + offset)
            .ok_or_else(|| ApiError::InvalidCallback(format!("unterminated entry in '{}'", value)))?;

        let candidate = rest[start + 1..end].trim();
        let url = Url::parse(candidate)
            .map_err(|e| ApiError::InvalidCallback(format!("'{}': {}", candidate, e)))?;
        if url.scheme() != "http" || url.host().is_none() {
            return Err(ApiError::InvalidCallback(format!(
                "'{}' is not an http URL",
                candidate
            )));
        }

        callbacks.push(candidate.to_string());
        rest = &rest[end + 1..];
    }

    if callbacks.is_empty() {
        return Err(ApiError::InvalidCallback(format!(
            "no callback URL in '{}'",
            value
        )));
    }
    Ok(callbacks)
}

/// Subscribers of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new subscriber.
    ///
    /// # Errors
    ///
    /// `ApiError::InvalidCallback` when the header holds no valid URL; no entry
    /// is created in that case.
    pub fn subscribe(&mut self, callback_header: &str, timeout_seconds: Option<u32>) -> Result<Subscription> {
        let callbacks = parse_callback_header(callback_header)?;
        self.purge_expired(Instant::now());
        let subscription = Subscription::new(
            callbacks,
            timeout_seconds.unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT),
        );
        debug!(
            "New subscription {} -> {:?} for {}s",
            subscription.sid, subscription.callbacks, subscription.timeout_seconds
        );
        self.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    /// Extend a live subscription, keeping its id and sequence.
    pub fn renew(&mut self, sid: &str, timeout_seconds: Option<u32>) -> Result<Subscription> {
        self.purge_expired(Instant::now());
        let subscription = self
            .subscriptions
            .iter_mut()
            .find(|s| s.sid == sid)
            .ok_or_else(|| ApiError::PreconditionFailed(format!("unknown subscription {}", sid)))?;

        subscription.timeout_seconds = timeout_seconds.unwrap_or(DEFAULT_SUBSCRIPTION_TIMEOUT);
        subscription.expires_at = expiry(subscription.timeout_seconds);
        Ok(subscription.clone())
    }

    /// Cancel a live subscription. A lapsed one counts as unknown.
    pub fn unsubscribe(&mut self, sid: &str) -> Result<()> {
        self.purge_expired(Instant::now());
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.sid != sid);
        if self.subscriptions.len() == before {
            return Err(ApiError::PreconditionFailed(format!(
                "unknown subscription {}",
                sid
            )));
        }
        debug!("Subscription {} cancelled", sid);
        Ok(())
    }

    /// Drop subscriptions whose lifetime lapsed before `now`.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| !s.is_expired(now));
        let purged = before - self.subscriptions.len();
        if purged > 0 {
            debug!("Purged {} expired subscription(s)", purged);
        }
        purged
    }

    pub fn get(&self, sid: &str) -> Option<&Subscription> {
        self.iter().find(|s| s.sid == sid)
    }

    /// Live subscriptions; lapsed ones are skipped even before a purge.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        let now = Instant::now();
        self.subscriptions.iter().filter(move |s| !s.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notifications of `variables` for every live subscriber.
    pub fn next_notifications(&mut self, variables: &[(&str, &str)]) -> EventBatch {
        self.purge_expired(Instant::now());
        let body = envelope::build_property_set(variables);

        let notifications = self
            .subscriptions
            .iter_mut()
            .map(|subscription| EventNotification {
                sid: subscription.sid.clone(),
                callbacks: subscription.callbacks.clone(),
                seq: subscription.take_seq(),
                body: body.clone(),
            })
            .collect();

        EventBatch { notifications }
    }

    /// The initial event for a freshly accepted subscriber.
    pub fn initial_notification(&mut self, sid: &str, variables: &[(&str, &str)]) -> Option<EventBatch> {
        let now = Instant::now();
        let subscription = self
            .subscriptions
            .iter_mut()
            .find(|s| s.sid == sid && !s.is_expired(now))?;
        let notification = EventNotification {
            sid: subscription.sid.clone(),
            callbacks: subscription.callbacks.clone(),
            seq: subscription.take_seq(),
            body: envelope::build_property_set(variables),
        };
        Some(EventBatch {
            notifications: vec![notification],
        })
    }
}

/// Outbound event channel to subscriber callbacks.
pub trait EventSender: Send + Sync {
    fn send_event(&self, callback_url: &str, sid: &str, seq: u32, body: &str) -> std::result::Result<(), SoapError>;
}

impl EventSender for SoapClient {
    fn send_event(&self, callback_url: &str, sid: &str, seq: u32, body: &str) -> std::result::Result<(), SoapError> {
        self.notify(callback_url, sid, seq, body)
    }
}

/// One event message addressed to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotification {
    pub sid: String,
    pub callbacks: Vec<String>,
    pub seq: u32,
    pub body: String,
}

impl EventNotification {
    /// Try each callback URL in order until one accepts the event.
    fn deliver(&self, sender: &dyn EventSender) -> std::result::Result<(), String> {
        let mut last_error = String::from("no callback URL");
        for callback in &self.callbacks {
            match sender.send_event(callback, &self.sid, self.seq, &self.body) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("Event {} #{} to {} failed: {}", self.sid, self.seq, callback, e);
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    }
}

/// Outcome of delivering a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// `(sid, error)` for each subscriber no callback accepted.
    pub failed: Vec<(String, String)>,
}

/// Notifications produced by one state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    notifications: Vec<EventNotification>,
}

impl EventBatch {
    pub fn notifications(&self) -> &[EventNotification] {
        &self.notifications
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Send every notification concurrently, one thread per subscriber.
    ///
    /// A failing subscriber is logged and reported; the others are unaffected.
    pub fn deliver(&self, sender: &dyn EventSender) -> DeliveryReport {
        let outcomes: Vec<(String, std::result::Result<(), String>)> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .notifications
                .iter()
                .map(|notification| {
                    let handle = scope.spawn(move || notification.deliver(sender));
                    (notification.sid.clone(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(sid, handle)| {
                    let outcome = handle
                        .join()
                        .unwrap_or_else(|_| Err("event sender panicked".to_string()));
                    (sid, outcome)
                })
                .collect()
        });

        let mut report = DeliveryReport::default();
        for (sid, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!("Event delivery to {} failed: {}", sid, error);
                    report.failed.push((sid, error));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use support::RecordingSender;
    use proptest::prelude::*;
    use rstest::rstest;

    mod support {
        use super::*;
        use std::sync::Mutex;

        /// Records deliveries; fails for URLs containing `fail`.
        #[derive(Default)]
        pub struct RecordingSender {
            pub sent: Mutex<Vec<(String, String, u32)>>,
        }

        impl EventSender for RecordingSender {
            fn send_event(&self, callback_url: &str, sid: &str, seq: u32, _body: &str) -> std::result::Result<(), SoapError> {
                if callback_url.contains("fail") {
                    return Err(SoapError::Network("connection refused".to_string()));
                }
                self.sent
                    .lock()
                    .unwrap()
                    .push((callback_url.to_string(), sid.to_string(), seq));
                Ok(())
            }
        }
    }

    #[rstest]
    #[case("<http://192.168.1.5:3400/notify>", vec!["http://192.168.1.5:3400/notify"])]
    #[case("<http://a.local/one><http://b.local/two>", vec!["http://a.local/one", "http://b.local/two"])]
    #[case(" < http://10.0.0.1/cb > ", vec!["http://10.0.0.1/cb"])]
    fn test_parse_callback_header(#[case] header: &str, #[case] expected: Vec<&str>) {
        assert_eq!(parse_callback_header(header).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("<>")]
    #[case("http://no-brackets/")]
    #[case("<ftp://host/cb>")]
    #[case("<http://unterminated")]
    #[case("<not a url>")]
    fn test_invalid_callback_rejected(#[case] header: &str) {
        assert!(matches!(
            parse_callback_header(header),
            Err(ApiError::InvalidCallback(_))
        ));
    }

    #[test]
    fn test_empty_callback_creates_no_subscription() {
        let mut registry = SubscriptionRegistry::new();
        assert!(matches!(
            registry.subscribe("", Some(300)),
            Err(ApiError::InvalidCallback(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_subscribe_renew_unsubscribe() {
        let mut registry = SubscriptionRegistry::new();
        let subscription = registry.subscribe("<http://host/cb>", None).unwrap();
        assert!(subscription.sid().starts_with("uuid:"));
        assert_eq!(subscription.timeout_seconds(), DEFAULT_SUBSCRIPTION_TIMEOUT);

        let renewed = registry.renew(subscription.sid(), Some(60)).unwrap();
        assert_eq!(renewed.sid(), subscription.sid());
        assert_eq!(renewed.timeout_seconds(), 60);

        registry.unsubscribe(subscription.sid()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lapsed_subscription_is_unknown() {
        let mut registry = SubscriptionRegistry::new();
        let lapsed = registry.subscribe("<http://host/cb>", Some(0)).unwrap();

        assert!(registry.get(lapsed.sid()).is_none());
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
        assert!(matches!(
            registry.renew(lapsed.sid(), Some(60)),
            Err(ApiError::PreconditionFailed(_))
        ));
        assert!(matches!(
            registry.unsubscribe(lapsed.sid()),
            Err(ApiError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn test_subscribe_purges_lapsed_entries() {
        let mut registry = SubscriptionRegistry::new();
        for _ in 0..5 {
            registry.subscribe("<http://host/old>", Some(0)).unwrap();
        }
        let live = registry.subscribe("<http://host/new>", Some(300)).unwrap();

        // Only the entry accepted last is still stored.
        assert_eq!(registry.subscriptions.len(), 1);
        assert_eq!(registry.get(live.sid()).map(Subscription::sid), Some(live.sid()));
    }

    #[test]
    fn test_unknown_sid_is_precondition_failed() {
        let mut registry = SubscriptionRegistry::new();
        assert!(matches!(
            registry.renew("uuid:missing", None),
            Err(ApiError::PreconditionFailed(_))
        ));
        assert!(matches!(
            registry.unsubscribe("uuid:missing"),
            Err(ApiError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn test_expired_subscription_is_purged_and_not_renewable() {
        let mut registry = SubscriptionRegistry::new();
        let subscription = registry.subscribe("<http://host/cb>", Some(0)).unwrap();

        assert!(matches!(
            registry.renew(subscription.sid(), Some(60)),
            Err(ApiError::PreconditionFailed(_))
        ));
        // The failed renew already dropped it.
        assert!(registry.subscriptions.is_empty());
        assert_eq!(registry.purge_expired(Instant::now()), 0);
        assert!(registry.next_notifications(&[("Status", "1")]).is_empty());
    }

    #[test]
    fn test_sequence_starts_at_zero_and_wraps_to_one() {
        let mut subscription = Subscription::new(vec!["http://host/cb".to_string()], 60);
        assert_eq!(subscription.take_seq(), 0);
        assert_eq!(subscription.take_seq(), 1);

        subscription.next_seq = u32::MAX;
        assert_eq!(subscription.take_seq(), u32::MAX);
        assert_eq!(subscription.take_seq(), 1);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let mut registry = SubscriptionRegistry::new();
        let good = registry.subscribe("<http://good/cb>", None).unwrap();
        let bad = registry.subscribe("<http://fail/cb>", None).unwrap();
        let fallback = registry
            .subscribe("<http://fail/first><http://good/second>", None)
            .unwrap();

        let sender = RecordingSender::default();
        let report = registry.next_notifications(&[("Status", "1")]).deliver(&sender);

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, bad.sid());

        let sent = sender.sent.lock().unwrap();
        assert!(sent.contains(&("http://good/cb".to_string(), good.sid().to_string(), 0)));
        assert!(sent.contains(&("http://good/second".to_string(), fallback.sid().to_string(), 0)));

        // Failure does not revoke the subscription.
        assert!(registry.get(bad.sid()).is_some());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_initial_notification_uses_first_sequence() {
        let mut registry = SubscriptionRegistry::new();
        let subscription = registry.subscribe("<http://host/cb>", None).unwrap();

        let initial = registry
            .initial_notification(subscription.sid(), &[("Status", "0")])
            .unwrap();
        assert_eq!(initial.notifications()[0].seq, 0);

        let next = registry.next_notifications(&[("Status", "1")]);
        assert_eq!(next.notifications()[0].seq, 1);
        assert!(registry.initial_notification("uuid:other", &[]).is_none());
    }

    proptest! {
        #[test]
        fn prop_sequence_strictly_increases_per_subscriber(changes in 1usize..40, subscribers in 1usize..5) {
            let mut registry = SubscriptionRegistry::new();
            for i in 0..subscribers {
                registry.subscribe(&format!("<http://host{}/cb>", i), None).unwrap();
            }

            let mut last: std::collections::HashMap<String, u32> = Default::default();
            for change in 0..changes {
                let value = change.to_string();
                let batch = registry.next_notifications(&[("Status", value.as_str())]);
                prop_assert_eq!(batch.len(), subscribers);
                for notification in batch.notifications() {
                    if let Some(previous) = last.get(&notification.sid) {
                        prop_assert!(notification.seq > *previous);
                    } else {
                        prop_assert_eq!(notification.seq, 0);
                    }
                    last.insert(notification.sid.clone(), notification.seq);
                }
            }
        }
    }
}
