//! Unread totals and the polling task behind the unread badge

use std::sync::Arc;
use std::time::Duration;

use bazaar_store::{ConversationStore, DocumentStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Sums a user's unread counters across their conversations
#[derive(Clone)]
pub struct UnreadCounterService {
    conversations: ConversationStore,
}

impl UnreadCounterService {
    pub fn new(db: Arc<dyn DocumentStore>) -> Self {
        Self {
            conversations: ConversationStore::new(db),
        }
    }

    /// Recomputed on every call, never cached
    pub async fn get_unread_total(&self, user_id: &str) -> Result<u64> {
        let total = self
            .conversations
            .list_by_participant(user_id)
            .await?
            .iter()
            .map(|c| c.unread_for(user_id))
            .sum();

        debug!("Unread total for {}: {}", user_id, total);
        Ok(total)
    }
}

/// What the badge shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnreadState {
    pub count: u64,
    /// True until the first refresh finishes
    pub loading: bool,
}

/// Badge text for an unread count: nothing for zero, capped at "9+"
pub fn badge_label(count: u64) -> Option<String> {
    match count {
        0 => None,
        1..=9 => Some(count.to_string()),
        _ => Some("9+".to_string()),
    }
}

pub struct UnreadPoller;

impl UnreadPoller {
    /// Start refreshing `user_id`'s total now and then every `period`.
    ///
    /// The task lives as long as the returned subscription. A failed refresh
    /// is logged and keeps the previous count.
    pub fn spawn(
        service: UnreadCounterService,
        user_id: impl Into<String>,
        period: Duration,
    ) -> UnreadSubscription {
        let user_id = user_id.into();
        let (tx, rx) = watch::channel(UnreadState {
            count: 0,
            loading: true,
        });

        info!("Polling unread total for {} every {:?}", user_id, period);

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                let refreshed = match service.get_unread_total(&user_id).await {
                    Ok(count) => Some(count),
                    Err(e) => {
                        warn!("Failed to refresh unread total for {}: {}", user_id, e);
                        None
                    }
                };
                tx.send_if_modified(|state| {
                    let next = UnreadState {
                        count: refreshed.unwrap_or(state.count),
                        loading: false,
                    };
                    let modified = *state != next;
                    *state = next;
                    modified
                });
            }

            debug!("Unread poller for {} stopped", user_id);
        });

        UnreadSubscription {
            state: rx,
            task: Some(task),
        }
    }
}

/// Handle on a running poller; dropping it stops the task
pub struct UnreadSubscription {
    state: watch::Receiver<UnreadState>,
    task: Option<JoinHandle<()>>,
}

impl UnreadSubscription {
    /// Latest published state
    pub fn current(&self) -> UnreadState {
        *self.state.borrow()
    }

    /// Wait for the next change; `None` once the poller is gone
    pub async fn changed(&mut self) -> Option<UnreadState> {
        self.state.changed().await.ok()?;
        Some(*self.state.borrow_and_update())
    }

    /// Another receiver of the same state
    pub fn watch(&self) -> watch::Receiver<UnreadState> {
        self.state.clone()
    }

    /// Stop the task and wait until it is gone
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for UnreadSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_badge_label() {
        assert_eq!(badge_label(0), None);
        assert_eq!(badge_label(1).as_deref(), Some("1"));
        assert_eq!(badge_label(9).as_deref(), Some("9"));
        assert_eq!(badge_label(10).as_deref(), Some("9+"));
        assert_eq!(badge_label(250).as_deref(), Some("9+"));
    }
}
