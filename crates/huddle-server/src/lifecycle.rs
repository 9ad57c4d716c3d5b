//! Group lifecycle timers.
//!
//! Every group moves Open → Locked → Deleted. A timer reset restarts the
//! activity window and replaces the group's pending transition chain; the
//! chain itself only sleeps and re-checks, all state changes go through the
//! group registry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use huddle_core::events::ChatEvent;
use huddle_core::ids::GroupId;
use huddle_store::active_sessions::ActiveSessionRepo;
use huddle_store::Database;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::groups::GroupRegistry;

/// How long a group stays open after its most recent timer reset.
pub const ACTIVE_DURATION: Duration = Duration::from_secs(5 * 24 * 60 * 60);
/// How long a locked group lingers before it is deleted.
pub const DELETE_DELAY: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Timer windows for the lifecycle chain.
#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    pub active_duration: Duration,
    pub delete_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            active_duration: ACTIVE_DURATION,
            delete_delay: DELETE_DELAY,
        }
    }
}

/// Drives each group's Open → Locked → Deleted progression.
///
/// One pending chain per group, keyed by its cancellation token. Stale
/// firings are no-ops twice over: the token is checked after each sleep and
/// the group's continued existence is re-checked before acting.
pub struct LifecycleManager {
    registry: Arc<GroupRegistry>,
    db: Database,
    events: broadcast::Sender<ChatEvent>,
    timers: Arc<DashMap<GroupId, CancellationToken>>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<GroupRegistry>,
        db: Database,
        events: broadcast::Sender<ChatEvent>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            db,
            events,
            timers: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Restart a group's activity window.
    ///
    /// Stamps the new deadline, replaces any pending transition chain and
    /// announces the reset to subscribers. Returns the new deadline, or None
    /// when the group no longer exists. Resetting a locked group is allowed
    /// and does not unlock it; the chain simply reaches the lock step again.
    pub fn reset(&self, group_id: &GroupId) -> Option<i64> {
        let expires_at =
            chrono::Utc::now().timestamp_millis() + self.config.active_duration.as_millis() as i64;
        if !self.registry.stamp_expiry(group_id, expires_at) {
            return None;
        }

        let token = CancellationToken::new();
        if let Some(old) = self.timers.insert(group_id.clone(), token.clone()) {
            old.cancel();
        }

        if self
            .events
            .send(ChatEvent::TimerReset {
                group_id: group_id.clone(),
                expires_at,
            })
            .is_err()
        {
            tracing::warn!("No event receivers for timer reset");
        }

        self.spawn_chain(group_id.clone(), token);
        Some(expires_at)
    }

    /// Cancel any pending transition chain for a group.
    pub fn cancel(&self, group_id: &GroupId) {
        if let Some((_, token)) = self.timers.remove(group_id) {
            token.cancel();
        }
    }

    /// Number of groups with a pending transition chain.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    fn spawn_chain(&self, group_id: GroupId, token: CancellationToken) {
        let registry = Arc::clone(&self.registry);
        let db = self.db.clone();
        let events = self.events.clone();
        let timers = Arc::clone(&self.timers);
        let active = self.config.active_duration;
        let delay = self.config.delete_delay;

        // Deadline fixed here, not at the task's first poll, so the chain
        // fires at the expiry this reset stamped.
        let active_sleep = tokio::time::sleep(active);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = active_sleep => {}
            }

            let Some(accounts) = registry.lock_group(&group_id) else {
                // The timer entry is still ours unless a newer chain replaced
                // it (which would have cancelled this token first).
                if !token.is_cancelled() {
                    timers.remove(&group_id);
                }
                return;
            };

            tracing::info!(group_id = %group_id, "Group chat locked");
            if events
                .send(ChatEvent::ChatExpired {
                    group_id: group_id.clone(),
                })
                .is_err()
            {
                tracing::warn!("No event receivers for chat expiry");
            }

            // Clear persisted sessions so accounts stop resuming into a
            // locked group. Failures are logged, never propagated.
            let sessions = ActiveSessionRepo::new(db.clone());
            for account in accounts {
                if let Err(e) = sessions.clear(&account) {
                    tracing::warn!(
                        account_id = %account,
                        error = %e,
                        "Could not clear active session"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            if registry.delete(&group_id) {
                tracing::info!(group_id = %group_id, "Group deleted");
            }
            if !token.is_cancelled() {
                timers.remove(&group_id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientId;
    use crate::groups::MatchOutcome;
    use huddle_core::ids::AccountId;

    fn setup() -> (
        Arc<GroupRegistry>,
        Database,
        LifecycleManager,
        broadcast::Receiver<ChatEvent>,
    ) {
        let registry = Arc::new(GroupRegistry::new());
        let db = Database::in_memory().unwrap();
        let (tx, rx) = broadcast::channel(64);
        let manager = LifecycleManager::new(
            Arc::clone(&registry),
            db.clone(),
            tx,
            LifecycleConfig::default(),
        );
        (registry, db, manager, rx)
    }

    fn make_group(registry: &GroupRegistry) -> GroupId {
        match registry.match_or_create(&ClientId::new(), &["chess".to_string()]) {
            MatchOutcome::Admitted { group_id, .. } => group_id,
            MatchOutcome::Full => panic!("expected admission"),
        }
    }

    /// Let woken background tasks run before asserting.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stamps_expiry_and_broadcasts() {
        let (registry, _db, manager, mut rx) = setup();
        let gid = make_group(&registry);

        let expires = manager.reset(&gid).unwrap();
        assert_eq!(registry.get(&gid).unwrap().expires_at, Some(expires));
        assert_eq!(manager.timer_count(), 1);

        match rx.try_recv().unwrap() {
            ChatEvent::TimerReset {
                group_id,
                expires_at,
            } => {
                assert_eq!(group_id, gid);
                assert_eq!(expires_at, expires);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reset_unknown_group_is_noop() {
        let (_registry, _db, manager, mut rx) = setup();

        assert!(manager.reset(&GroupId::new()).is_none());
        assert_eq!(manager.timer_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn chain_locks_then_deletes() {
        let (registry, _db, manager, mut rx) = setup();
        let gid = make_group(&registry);
        manager.reset(&gid);
        let _ = rx.try_recv(); // drain the reset event

        tokio::time::advance(ACTIVE_DURATION).await;
        settle().await;

        assert!(registry.get(&gid).unwrap().locked);
        match rx.try_recv().unwrap() {
            ChatEvent::ChatExpired { group_id } => assert_eq!(group_id, gid),
            other => panic!("unexpected event: {other:?}"),
        }

        tokio::time::advance(DELETE_DELAY).await;
        settle().await;

        assert!(!registry.contains(&gid));
        assert_eq!(manager.timer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_clears_active_sessions() {
        let (registry, db, manager, _rx) = setup();
        let gid = make_group(&registry);
        let account = AccountId::from_raw("srn-77");
        registry.record_account(&gid, &account);

        let sessions = ActiveSessionRepo::new(db);
        sessions
            .set(&account, &gid, "Feral Waffles", &["chess".to_string()], None)
            .unwrap();

        manager.reset(&gid);
        tokio::time::advance(ACTIVE_DURATION).await;
        settle().await;

        assert!(sessions.get(&account).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_replaces_pending_chain() {
        let (registry, _db, manager, _rx) = setup();
        let gid = make_group(&registry);
        manager.reset(&gid);

        // One day short of expiry, a reset restarts the window.
        tokio::time::advance(ACTIVE_DURATION - Duration::from_secs(24 * 60 * 60)).await;
        manager.reset(&gid);

        tokio::time::advance(Duration::from_secs(2 * 24 * 60 * 60)).await;
        settle().await;
        assert!(!registry.get(&gid).unwrap().locked);

        tokio::time::advance(ACTIVE_DURATION).await;
        settle().await;
        assert!(registry.get(&gid).unwrap().locked);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_chain() {
        let (registry, _db, manager, _rx) = setup();
        let gid = make_group(&registry);
        manager.reset(&gid);
        manager.cancel(&gid);
        assert_eq!(manager.timer_count(), 0);

        tokio::time::advance(ACTIVE_DURATION + DELETE_DELAY).await;
        settle().await;

        let group = registry.get(&gid).unwrap();
        assert!(!group.locked);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_firing_on_deleted_group_is_noop() {
        let (registry, _db, manager, mut rx) = setup();
        let gid = make_group(&registry);
        manager.reset(&gid);
        let _ = rx.try_recv();

        // Delete out from under the chain without cancelling it.
        registry.delete(&gid);
        tokio::time::advance(ACTIVE_DURATION).await;
        settle().await;

        assert!(rx.try_recv().is_err());
        assert_eq!(manager.timer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resetting_locked_group_defers_deletion() {
        let (registry, _db, manager, mut rx) = setup();
        let gid = make_group(&registry);
        manager.reset(&gid);

        tokio::time::advance(ACTIVE_DURATION).await;
        settle().await;
        assert!(registry.get(&gid).unwrap().locked);

        // Reset during the deletion window: still locked, but the group
        // lives for another full cycle.
        manager.reset(&gid);
        assert!(registry.get(&gid).unwrap().locked);

        tokio::time::advance(DELETE_DELAY).await;
        settle().await;
        assert!(registry.contains(&gid));

        tokio::time::advance(ACTIVE_DURATION - DELETE_DELAY).await;
        settle().await;
        tokio::time::advance(DELETE_DELAY).await;
        settle().await;
        assert!(!registry.contains(&gid));

        // Two resets, two expirations.
        let mut resets = 0;
        let mut expiries = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                ChatEvent::TimerReset { .. } => resets += 1,
                ChatEvent::ChatExpired { .. } => expiries += 1,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(resets, 2);
        assert_eq!(expiries, 2);
    }
}
