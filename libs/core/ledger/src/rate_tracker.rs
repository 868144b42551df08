//! Rolling-window rate tracker for renewable resources.

use crate::errors::LedgerError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crucible_core_types::{KernelError, PrincipalId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::instrument;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_per_window: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Ok,
    Timeout,
    Cancelled,
}

type ResourceKey = (PrincipalId, String);

#[derive(Default)]
struct ResourceState {
    events: VecDeque<(DateTime<Utc>, u64)>,
    waiters: VecDeque<Arc<Notify>>,
}

/// Checkpoint-friendly view of every (principal, resource) window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTrackerSnapshot {
    pub windows: HashMap<String, Vec<(PrincipalId, DateTime<Utc>, u64)>>,
}

pub struct RateTracker {
    config: HashMap<String, RateLimitConfig>,
    state: Mutex<HashMap<ResourceKey, ResourceState>>,
}

impl RateTracker {
    pub fn new(config: HashMap<String, RateLimitConfig>) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_snapshot(config: HashMap<String, RateLimitConfig>, snapshot: RateTrackerSnapshot) -> Self {
        let mut state = HashMap::new();
        for (resource, rows) in snapshot.windows {
            for (principal, ts, amount) in rows {
                let key = (principal, resource.clone());
                let entry: &mut ResourceState = state.entry(key).or_default();
                entry.events.push_back((ts, amount));
            }
        }
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> RateTrackerSnapshot {
        let guard = self.state.lock().await;
        let mut windows: HashMap<String, Vec<(PrincipalId, DateTime<Utc>, u64)>> = HashMap::new();
        for ((principal, resource), rows) in guard.iter() {
            let bucket = windows.entry(resource.clone()).or_default();
            for (ts, amount) in &rows.events {
                bucket.push((principal.clone(), *ts, *amount));
            }
        }
        RateTrackerSnapshot { windows }
    }

    fn limit_for(&self, resource: &str) -> Result<RateLimitConfig, LedgerError> {
        self.config
            .get(resource)
            .copied()
            .ok_or_else(|| LedgerError::Kernel(KernelError::InvalidArgument(format!("unknown resource {resource}"))))
    }

    fn gc(events: &mut VecDeque<(DateTime<Utc>, u64)>, window: ChronoDuration) {
        let cutoff = Utc::now() - window;
        while let Some((ts, _)) = events.front() {
            if *ts < cutoff {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    fn sum(events: &VecDeque<(DateTime<Utc>, u64)>) -> u64 {
        events.iter().map(|(_, amount)| *amount).sum()
    }

    pub async fn has_capacity(&self, principal: &PrincipalId, resource: &str, amount: u64) -> Result<bool, LedgerError> {
        let limit = self.limit_for(resource)?;
        let window = ChronoDuration::from_std(limit.window).unwrap_or(ChronoDuration::zero());
        let mut guard = self.state.lock().await;
        let entry = guard.entry((principal.clone(), resource.to_string())).or_default();
        Self::gc(&mut entry.events, window);
        Ok(Self::sum(&entry.events) + amount <= limit.max_per_window)
    }

    pub async fn remaining(&self, principal: &PrincipalId, resource: &str) -> Result<u64, LedgerError> {
        let limit = self.limit_for(resource)?;
        let window = ChronoDuration::from_std(limit.window).unwrap_or(ChronoDuration::zero());
        let mut guard = self.state.lock().await;
        let entry = guard.entry((principal.clone(), resource.to_string())).or_default();
        Self::gc(&mut entry.events, window);
        Ok(limit.max_per_window.saturating_sub(Self::sum(&entry.events)))
    }

    /// Records `amount` against the window if capacity allows, atomically.
    #[instrument(skip(self), fields(%principal, resource, amount))]
    pub async fn consume(&self, principal: &PrincipalId, resource: &str, amount: u64) -> Result<(), LedgerError> {
        let limit = self.limit_for(resource)?;
        let window = ChronoDuration::from_std(limit.window).unwrap_or(ChronoDuration::zero());
        let mut guard = self.state.lock().await;
        let entry = guard.entry((principal.clone(), resource.to_string())).or_default();
        Self::gc(&mut entry.events, window);
        if Self::sum(&entry.events) + amount > limit.max_per_window {
            return Err(LedgerError::Kernel(KernelError::RateExceeded));
        }
        entry.events.push_back((Utc::now(), amount));
        Ok(())
    }

    /// Earliest-available estimate from the head of the event deque: the
    /// moment the oldest event ages out of the window.
    fn earliest_availability(entry: &ResourceState, window: ChronoDuration) -> Duration {
        match entry.events.front() {
            Some((ts, _)) => {
                let expires_at = *ts + window;
                let remaining = expires_at.signed_duration_since(Utc::now());
                remaining.to_std().unwrap_or(Duration::from_millis(1))
            }
            None => Duration::from_millis(1),
        }
    }

    /// Blocks until `amount` of `resource` is available for `principal`,
    /// then consumes it, or returns `Timeout`/`Cancelled`. Waiters on the
    /// same (principal, resource) queue are served FIFO by first-wait
    /// order.
    pub async fn wait_for_capacity(
        &self,
        principal: &PrincipalId,
        resource: &str,
        amount: u64,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, LedgerError> {
        let limit = self.limit_for(resource)?;
        let window = ChronoDuration::from_std(limit.window).unwrap_or(ChronoDuration::zero());
        let key = (principal.clone(), resource.to_string());
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let my_ticket = Arc::new(Notify::new());

        {
            let mut guard = self.state.lock().await;
            let entry = guard.entry(key.clone()).or_default();
            entry.waiters.push_back(my_ticket.clone());
        }

        loop {
            let (is_front, wait_hint) = {
                let mut guard = self.state.lock().await;
                let entry = guard.entry(key.clone()).or_default();
                Self::gc(&mut entry.events, window);
                let at_front = entry
                    .waiters
                    .front()
                    .map(|w| Arc::ptr_eq(w, &my_ticket))
                    .unwrap_or(false);
                if at_front && Self::sum(&entry.events) + amount <= limit.max_per_window {
                    entry.events.push_back((Utc::now(), amount));
                    entry.waiters.pop_front();
                    if let Some(next) = entry.waiters.front() {
                        next.notify_one();
                    }
                    return Ok(WaitOutcome::Ok);
                }
                (at_front, Self::earliest_availability(entry, window))
            };

            let sleep_for = if is_front { wait_hint } else { Duration::from_millis(25) };

            if let Some(dl) = deadline {
                if tokio::time::Instant::now() >= dl {
                    self.cancel_wait(&key, &my_ticket).await;
                    return Ok(WaitOutcome::Timeout);
                }
            }

            let sleep_fut = tokio::time::sleep(sleep_for.min(Duration::from_secs(1)));
            tokio::select! {
                _ = sleep_fut => {}
                _ = my_ticket.notified() => {}
            }
        }
    }

    async fn cancel_wait(&self, key: &ResourceKey, ticket: &Arc<Notify>) {
        let mut guard = self.state.lock().await;
        if let Some(entry) = guard.get_mut(key) {
            entry.waiters.retain(|w| !Arc::ptr_eq(w, ticket));
            if let Some(next) = entry.waiters.front() {
                next.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HashMap<String, RateLimitConfig> {
        let mut m = HashMap::new();
        m.insert(
            "cpu_rate".to_string(),
            RateLimitConfig { window: Duration::from_millis(200), max_per_window: 5 },
        );
        m
    }

    #[tokio::test]
    async fn consume_rejects_once_window_is_full() {
        let tracker = RateTracker::new(config());
        let p = PrincipalId::new("a");
        for _ in 0..5 {
            tracker.consume(&p, "cpu_rate", 1).await.unwrap();
        }
        let result = tracker.consume(&p, "cpu_rate", 1).await;
        assert!(matches!(result, Err(LedgerError::Kernel(KernelError::RateExceeded))));
    }

    #[tokio::test]
    async fn capacity_frees_up_after_the_window_elapses() {
        let tracker = RateTracker::new(config());
        let p = PrincipalId::new("a");
        for _ in 0..5 {
            tracker.consume(&p, "cpu_rate", 1).await.unwrap();
        }
        assert!(!tracker.has_capacity(&p, "cpu_rate", 1).await.unwrap());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(tracker.has_capacity(&p, "cpu_rate", 1).await.unwrap());
    }

    #[tokio::test]
    async fn wait_for_capacity_unblocks_once_the_window_admits_it() {
        let tracker = Arc::new(RateTracker::new(config()));
        let p = PrincipalId::new("a");
        for _ in 0..5 {
            tracker.consume(&p, "cpu_rate", 1).await.unwrap();
        }
        let outcome = tracker
            .wait_for_capacity(&p, "cpu_rate", 1, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Ok);
    }

    #[tokio::test]
    async fn wait_for_capacity_times_out_without_consuming() {
        let tracker = RateTracker::new(config());
        let p = PrincipalId::new("a");
        for _ in 0..5 {
            tracker.consume(&p, "cpu_rate", 1).await.unwrap();
        }
        let outcome = tracker
            .wait_for_capacity(&p, "cpu_rate", 1, Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Timeout);
        assert!(!tracker.has_capacity(&p, "cpu_rate", 1).await.unwrap());
    }
}
