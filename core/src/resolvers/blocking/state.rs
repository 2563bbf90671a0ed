//! Per-group enable/disable state machine, per `spec.md` §4.5's
//! "Disable / enable API" and §4.9's state-machine summary:
//! `{enabled, disabled-indefinite, disabled-until(t)}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::events::{Event, EventBus};

use super::groups::{now_unix, unknown_group_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Enabled,
    DisabledIndefinite,
    DisabledUntil(u64),
}

/// `Status()`'s return shape.
#[derive(Debug, Clone)]
pub struct BlockingStatus {
    pub enabled: bool,
    pub disabled_groups: Vec<String>,
    pub auto_enable_at: Option<u64>,
}

struct Inner {
    states: Mutex<HashMap<String, GroupState>>,
    /// Generation counter per group. A scheduled re-enable timer captures
    /// the generation current when it was scheduled; on firing it only
    /// acts if that generation is still current, so it can never resurrect
    /// a group a later, still-pending, longer disable call re-disabled
    /// (Invariant 6).
    generations: Mutex<HashMap<String, u64>>,
    next_generation: AtomicU64,
    all_group_names: Vec<String>,
    events: EventBus,
}

/// Process-wide blocking enable state shared across every request-handling
/// task and the admin surface.
#[derive(Clone)]
pub struct BlockingState {
    inner: Arc<Inner>,
}

impl BlockingState {
    pub fn new(all_group_names: Vec<String>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                generations: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                all_group_names,
                events,
            }),
        }
    }

    pub fn is_group_enabled(&self, group: &str) -> bool {
        matches!(
            self.inner.states.lock().unwrap().get(group),
            None | Some(GroupState::Enabled)
        )
    }

    /// `Disable(duration, groups)`. Empty `groups` means all groups.
    /// `duration == ZERO` disables indefinitely.
    pub fn disable(&self, duration: Duration, groups: Vec<String>) -> crate::error::Result<()> {
        let targets = if groups.is_empty() {
            self.inner.all_group_names.clone()
        } else {
            for g in &groups {
                if !self.inner.all_group_names.contains(g) {
                    return Err(unknown_group_error(g));
                }
            }
            groups
        };

        let mut generations = self.inner.generations.lock().unwrap();
        let mut states = self.inner.states.lock().unwrap();
        let mut scheduled = Vec::new();
        for group in &targets {
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            generations.insert(group.clone(), generation);
            if duration.is_zero() {
                states.insert(group.clone(), GroupState::DisabledIndefinite);
            } else {
                let until = now_unix() + duration.as_secs();
                states.insert(group.clone(), GroupState::DisabledUntil(until));
                scheduled.push((group.clone(), generation));
            }
        }
        drop(states);
        drop(generations);

        self.inner.events.publish(Event::BlockingEnabledEvent { enabled: false });

        if !duration.is_zero() {
            self.schedule_reenable(duration, scheduled);
        }
        Ok(())
    }

    fn schedule_reenable(&self, duration: Duration, groups: Vec<(String, u64)>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut states = inner.states.lock().unwrap();
            let generations = inner.generations.lock().unwrap();
            let mut any_reenabled = false;
            for (group, generation) in groups {
                if generations.get(&group).copied() == Some(generation) {
                    states.insert(group, GroupState::Enabled);
                    any_reenabled = true;
                }
            }
            drop(states);
            drop(generations);
            if any_reenabled {
                inner.events.publish(Event::BlockingEnabledEvent { enabled: true });
            }
        });
    }

    /// `Enable()`: re-enables everything and cancels any pending timer (by
    /// bumping every group's generation so stale timers no-op on fire).
    pub fn enable(&self) {
        let mut generations = self.inner.generations.lock().unwrap();
        for group in &self.inner.all_group_names {
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            generations.insert(group.clone(), generation);
        }
        drop(generations);
        self.inner.states.lock().unwrap().clear();
        self.inner.events.publish(Event::BlockingEnabledEvent { enabled: true });
    }

    pub fn status(&self) -> BlockingStatus {
        let states = self.inner.states.lock().unwrap();
        let mut disabled_groups = Vec::new();
        let mut auto_enable_at = None;
        for (group, state) in states.iter() {
            match state {
                GroupState::Enabled => {}
                GroupState::DisabledIndefinite => disabled_groups.push(group.clone()),
                GroupState::DisabledUntil(at) => {
                    disabled_groups.push(group.clone());
                    auto_enable_at = Some(auto_enable_at.map_or(*at, |existing: u64| existing.min(*at)));
                }
            }
        }
        BlockingStatus {
            enabled: disabled_groups.is_empty(),
            disabled_groups,
            auto_enable_at,
        }
    }

    /// Reflects a remote `EnabledMessage{state, groups}` received over the
    /// shared-cache transport. A message naming unknown groups is ignored
    /// entirely and must not flip any local state (§4.5).
    pub fn apply_remote(&self, enabled: bool, groups: Vec<String>) {
        let targets = if groups.is_empty() {
            self.inner.all_group_names.clone()
        } else {
            if groups.iter().any(|g| !self.inner.all_group_names.contains(g)) {
                return;
            }
            groups
        };

        if enabled {
            self.enable();
        } else {
            let _ = self.disable(Duration::ZERO, targets);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> BlockingState {
        BlockingState::new(vec!["default".to_string(), "group1".to_string()], EventBus::new())
    }

    #[test]
    fn new_groups_start_enabled() {
        let s = state();
        assert!(s.is_group_enabled("default"));
        assert!(s.is_group_enabled("group1"));
    }

    #[test]
    fn disable_unknown_group_fails_and_preserves_state() {
        let s = state();
        let err = s.disable(Duration::ZERO, vec!["nope".to_string()]);
        assert!(err.is_err());
        assert!(s.is_group_enabled("default"));
        assert!(s.is_group_enabled("group1"));
    }

    #[test]
    fn empty_groups_targets_everything() {
        let s = state();
        s.disable(Duration::ZERO, Vec::new()).unwrap();
        assert!(!s.is_group_enabled("default"));
        assert!(!s.is_group_enabled("group1"));
    }

    #[test]
    fn disable_indefinite_then_enable_clears_state() {
        let s = state();
        s.disable(Duration::ZERO, vec!["group1".to_string()]).unwrap();
        assert!(!s.is_group_enabled("group1"));
        s.enable();
        assert!(s.is_group_enabled("group1"));
        assert!(s.status().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_reenable_fires_after_duration() {
        let s = state();
        s.disable(Duration::from_millis(50), vec!["group1".to_string()]).unwrap();
        assert!(!s.is_group_enabled("group1"));

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(s.is_group_enabled("group1"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_resurrect_a_group_redisabled_by_a_longer_timer() {
        let s = state();
        s.disable(Duration::from_millis(50), vec!["group1".to_string()]).unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        // A later, longer disable must win: the first timer firing at 50ms
        // must not re-enable the group before the second timer's 500ms lapse.
        s.disable(Duration::from_millis(500), vec!["group1".to_string()]).unwrap();

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!s.is_group_enabled("group1"), "stale shorter timer must not re-enable the group");

        tokio::time::advance(Duration::from_millis(450)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(s.is_group_enabled("group1"));
    }

    #[test]
    fn apply_remote_with_unknown_group_is_ignored() {
        let s = state();
        s.apply_remote(false, vec!["unknown".to_string()]);
        assert!(s.is_group_enabled("default"));
        assert!(s.is_group_enabled("group1"));
    }

    #[test]
    fn apply_remote_with_known_group_flips_local_state() {
        let s = state();
        s.apply_remote(false, vec!["group1".to_string()]);
        assert!(!s.is_group_enabled("group1"));
        s.apply_remote(true, Vec::new());
        assert!(s.is_group_enabled("group1"));
    }
}
