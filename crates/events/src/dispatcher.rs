//! Fan-out of one event to every registered notifier.

use proxbridge_common::{ErrorInfo, Event, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Result of one notifier's delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub notifier: String,
    /// `None` on success.
    pub error: Option<ErrorInfo>,
}

/// Per-event accounting, one entry per notifier in registration order.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub event_id: String,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

/// Delivers each event to all notifiers concurrently. One notifier
/// failing or stalling never blocks the others; every attempt is bounded
/// by the configured timeout.
pub struct Dispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
    notifier_timeout: Duration,
}

impl Dispatcher {
    pub fn new(notifier_timeout: Duration) -> Self {
        Self {
            notifiers: Vec::new(),
            notifier_timeout,
        }
    }

    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        debug!(notifier = %notifier.name(), "Registered notifier");
        self.notifiers.push(notifier);
    }

    pub fn notifier_count(&self) -> usize {
        self.notifiers.len()
    }

    pub fn notifiers(&self) -> &[Arc<dyn Notifier>] {
        &self.notifiers
    }

    /// Send `event` to every notifier and account for each attempt.
    /// Never returns an error: delivery failures are data, not faults.
    pub async fn dispatch(&self, event: &Event) -> DispatchReport {
        if self.notifiers.is_empty() {
            debug!(event_id = %event.id, "No notifiers registered, event dropped");
            return DispatchReport {
                event_id: event.id.clone(),
                outcomes: Vec::new(),
            };
        }

        let mut set: JoinSet<(usize, Option<ErrorInfo>)> = JoinSet::new();
        for (index, notifier) in self.notifiers.iter().enumerate() {
            let notifier = Arc::clone(notifier);
            let event = event.clone();
            let timeout = self.notifier_timeout;
            set.spawn(async move {
                let result = tokio::time::timeout(timeout, notifier.send(&event)).await;
                let error = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(ErrorInfo::from(&err)),
                    Err(_) => Some(ErrorInfo::new(
                        "timeout",
                        format!(
                            "notifier '{}' exceeded {}ms",
                            notifier.name(),
                            timeout.as_millis()
                        ),
                    )),
                };
                (index, error)
            });
        }

        let mut slots: Vec<Option<Option<ErrorInfo>>> = vec![None; self.notifiers.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, error)) => slots[index] = Some(error),
                Err(err) => warn!(error = %err, "Notifier delivery task panicked"),
            }
        }

        let outcomes: Vec<DeliveryOutcome> = self
            .notifiers
            .iter()
            .zip(slots)
            .map(|(notifier, slot)| DeliveryOutcome {
                notifier: notifier.name().to_string(),
                error: slot.unwrap_or_else(|| {
                    Some(ErrorInfo::new(
                        "notifier_delivery_failed",
                        "delivery task aborted",
                    ))
                }),
            })
            .collect();

        let report = DispatchReport {
            event_id: event.id.clone(),
            outcomes,
        };

        for outcome in &report.outcomes {
            if let Some(error) = &outcome.error {
                warn!(
                    event_id = %event.id,
                    notifier = %outcome.notifier,
                    kind = %error.kind,
                    error = %error.message,
                    "Notification delivery failed"
                );
            }
        }
        info!(
            event_id = %event.id,
            severity = %event.severity.as_str(),
            delivered = report.delivered(),
            total = report.outcomes.len(),
            "Event dispatched"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proxbridge_common::{BridgeError, Result, Severity};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct RecordingNotifier {
        name: String,
        sent: AtomicU32,
        fail: bool,
        delay: Duration,
    }

    impl RecordingNotifier {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                sent: AtomicU32::new(0),
                fail: false,
                delay: Duration::ZERO,
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                sent: AtomicU32::new(0),
                fail: true,
                delay: Duration::ZERO,
            })
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                sent: AtomicU32::new(0),
                fail: false,
                delay,
            })
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _event: &Event) -> Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BridgeError::notifier_delivery_failed(
                    &self.name,
                    "simulated outage",
                ));
            }
            Ok(())
        }
    }

    fn sample_event() -> Event {
        Event::new("test", "Backup failed", "vzdump exited 1").with_severity(Severity::Error)
    }

    #[tokio::test]
    async fn delivers_to_all_and_accounts_failures() {
        let ok = RecordingNotifier::new("gotify");
        let bad = RecordingNotifier::failing("discord");
        let mut dispatcher = Dispatcher::new(Duration::from_secs(1));
        dispatcher.register(ok.clone());
        dispatcher.register(bad.clone());

        let report = dispatcher.dispatch(&sample_event()).await;
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.failed(), 1);
        // Registration order survives the concurrent fan-out.
        assert_eq!(report.outcomes[0].notifier, "gotify");
        assert!(report.outcomes[0].error.is_none());
        assert_eq!(
            report.outcomes[1].error.as_ref().unwrap().kind,
            "notifier_delivery_failed"
        );
        assert_eq!(ok.sent.load(Ordering::SeqCst), 1);
        assert_eq!(bad.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_notifier_is_timed_out_without_blocking_others() {
        let fast = RecordingNotifier::new("fast");
        let slow = RecordingNotifier::slow("slow", Duration::from_secs(30));
        let mut dispatcher = Dispatcher::new(Duration::from_millis(50));
        dispatcher.register(slow);
        dispatcher.register(fast.clone());

        let started = Instant::now();
        let report = dispatcher.dispatch(&sample_event()).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.outcomes[0].error.as_ref().unwrap().kind, "timeout");
        assert_eq!(fast.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_registry_yields_empty_report() {
        let dispatcher = Dispatcher::new(Duration::from_secs(1));
        let report = dispatcher.dispatch(&sample_event()).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.delivered(), 0);
    }
}
