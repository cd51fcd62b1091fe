//! `emit(category, event_type, message, value?)`. Grounded on
//! `services::health::HealthService::check_health`, which fans
//! out to independent per-component checks and combines their outcomes
//! without letting one failure short-circuit the others.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{NotifyError, Result};
use crate::models::notification::{NotificationCategory, NotificationRule};
use crate::models::Id;
use crate::sender::Sender;
use crate::store::Store;

pub struct Dispatcher {
    store: Arc<dyn Store>,
    sender: Arc<dyn Sender>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, sender: Arc<dyn Sender>) -> Self {
        Self { store, sender }
    }

    /// Resolves enabled rules for `(category, event_type)`, evaluates each
    /// rule's threshold predicate against `value`, and delivers to every
    /// matching rule's channel in parallel. Returns `Ok(())` if at least one
    /// delivery succeeded (or there were no matching rules at all); returns
    /// the last transport error only if every delivery failed.
    pub async fn emit(
        &self,
        category: NotificationCategory,
        event_type: &str,
        message: impl Into<String>,
        value: Option<f64>,
    ) -> Result<()> {
        let message = message.into();
        let rules = self.store.list_rules_for(category, event_type).await?;
        let matching: Vec<NotificationRule> =
            rules.into_iter().filter(|r| r.matches(value)).collect();

        if matching.is_empty() {
            debug!(
                target: "notify::dispatcher",
                event_type,
                "no enabled rule matched this event, nothing to deliver"
            );
            return Ok(());
        }

        let event_id = match self.store.get_event(category, event_type).await {
            Ok(event) => event.id,
            Err(e) => {
                warn!(target: "notify::dispatcher", event_type, error = %e, "no registered event for this (category, event_type)");
                return Err(e.into());
            }
        };

        let deliveries = matching
            .into_iter()
            .map(|rule| self.deliver_one(rule, event_id, message.clone()));
        let results = join_all(deliveries).await;

        if results.iter().any(|r| r.is_ok()) {
            Ok(())
        } else {
            Err(results
                .into_iter()
                .rev()
                .find_map(|r| r.err())
                .unwrap_or(NotifyError::Send("no channels configured".to_string()))
                .into())
        }
    }

    async fn deliver_one(
        &self,
        rule: NotificationRule,
        event_id: Id,
        payload: String,
    ) -> std::result::Result<(), NotifyError> {
        let channel = match self.store.get_channel(rule.channel_id).await {
            Ok(c) if c.enabled => c,
            Ok(_) => return Ok(()),
            Err(e) => {
                warn!(target: "notify::dispatcher::deliver_one", channel_id = rule.channel_id, error = %e, "channel lookup failed");
                return Err(NotifyError::Build(e.to_string()));
            }
        };

        let send_result = self.sender.send(&channel.url, &payload).await;
        let (success, error) = match &send_result {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };

        if let Err(e) = self
            .store
            .insert_notification_history(crate::models::notification::NotificationHistory {
                id: 0,
                channel_id: rule.channel_id,
                event_id,
                success,
                error,
                payload,
                created_at: chrono::Utc::now(),
            })
            .await
        {
            warn!(target: "notify::dispatcher::deliver_one", channel_id = rule.channel_id, error = %e, "failed to record notification history");
        }

        send_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::{
        NotificationChannel, NotificationEvent, NotificationRule,
    };
    use crate::sender::{AlwaysFailsSender, AlwaysSucceedsSender};
    use crate::store::memory::InMemoryStore;

    /// Fails deliveries whose URL carries a `bad-marker` substring, succeeds
    /// otherwise; lets a single fake exercise the partial-failure fan-out
    /// path without needing to know IDs minted by the store.
    struct MarkerSender;

    #[async_trait::async_trait]
    impl Sender for MarkerSender {
        async fn send(&self, url: &str, _payload: &str) -> std::result::Result<(), NotifyError> {
            if url.contains("bad-marker") {
                Err(NotifyError::Send("simulated failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn fan_out_records_one_history_row_per_channel_and_returns_ok_on_partial_success() {
        let store = Arc::new(InMemoryStore::new());
        let event_id = store.seed_event(NotificationEvent {
            id: 0,
            category: NotificationCategory::Packetloss,
            event_type: "threshold_exceeded".to_string(),
            supports_threshold: false,
            threshold_unit: None,
        });
        let good_channel = store.seed_channel(NotificationChannel {
            id: 0,
            name: "good".to_string(),
            url: "discord://good".to_string(),
            enabled: true,
        });
        let bad_channel = store.seed_channel(NotificationChannel {
            id: 0,
            name: "bad".to_string(),
            url: "discord://bad-marker".to_string(),
            enabled: true,
        });
        store.seed_rule(NotificationRule {
            id: 0,
            channel_id: good_channel,
            event_id,
            enabled: true,
            threshold_value: None,
            threshold_operator: None,
        });
        store.seed_rule(NotificationRule {
            id: 0,
            channel_id: bad_channel,
            event_id,
            enabled: true,
            threshold_value: None,
            threshold_operator: None,
        });

        let dispatcher = Dispatcher::new(store.clone(), Arc::new(MarkerSender));

        let result = dispatcher
            .emit(
                NotificationCategory::Packetloss,
                "threshold_exceeded",
                "loss exceeded",
                None,
            )
            .await;

        assert!(result.is_ok());
        let rows = store.history_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|r| r.success).count(), 1);
        assert_eq!(rows.iter().filter(|r| !r.success).count(), 1);
    }

    #[tokio::test]
    async fn threshold_less_rule_matches_any_value() {
        let store = Arc::new(InMemoryStore::new());
        let event_id = store.seed_event(NotificationEvent {
            id: 0,
            category: NotificationCategory::Agent,
            event_type: "agent_connected".to_string(),
            supports_threshold: false,
            threshold_unit: None,
        });
        let channel_id = store.seed_channel(NotificationChannel {
            id: 0,
            name: "c".to_string(),
            url: "discord://x".to_string(),
            enabled: true,
        });
        store.seed_rule(NotificationRule {
            id: 0,
            channel_id,
            event_id,
            enabled: true,
            threshold_value: None,
            threshold_operator: None,
        });

        let dispatcher = Dispatcher::new(store.clone(), Arc::new(AlwaysSucceedsSender));
        dispatcher
            .emit(NotificationCategory::Agent, "agent_connected", "up", None)
            .await
            .unwrap();
        assert_eq!(store.history_rows().len(), 1);

        let failing = Dispatcher::new(store.clone(), Arc::new(AlwaysFailsSender));
        let err = failing
            .emit(NotificationCategory::Agent, "agent_connected", "up", None)
            .await;
        assert!(err.is_err());
        assert_eq!(store.history_rows().len(), 2);
    }
}
