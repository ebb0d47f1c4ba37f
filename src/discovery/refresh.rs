//! Weight refresh scheduler
//!
//! One background task per registered instance recomputes the instance's
//! weight on a fixed cadence and publishes it through the registry. A
//! per-instance in-flight lock keeps refreshes for the same instance from
//! overlapping, whether they come from the timer, from
//! [`WeightRefresher::trigger`] or from a schedule being replaced.
//!
//! A refresh that finds the record deleted, or its coordinator closed,
//! deregisters the task instead of retrying forever.
//!
//! An explicit weight update does not reset the timer; the next scheduled
//! refresh overwrites it.

use crate::common::{timestamp_now_millis, Error, Result};
use crate::discovery::instance::{InstanceKey, ServiceInstance};
use crate::discovery::registry::InstanceRegistry;
use futures_util::future::{self, BoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Computes the weight an instance should publish
pub trait WeightPolicy: Send + Sync + 'static {
    fn compute(&self, instance: ServiceInstance) -> BoxFuture<'static, Result<u64>>;
}

/// Always publishes the same weight
#[derive(Debug, Clone, Copy)]
pub struct FixedWeight(pub u64);

impl WeightPolicy for FixedWeight {
    fn compute(&self, _instance: ServiceInstance) -> BoxFuture<'static, Result<u64>> {
        Box::pin(future::ready(Ok(self.0)))
    }
}

/// Adapts an async closure into a [`WeightPolicy`]
pub struct FnWeight<F>(F);

pub fn weight_fn<F, Fut>(f: F) -> FnWeight<F>
where
    F: Fn(ServiceInstance) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<u64>> + Send + 'static,
{
    FnWeight(f)
}

impl<F, Fut> WeightPolicy for FnWeight<F>
where
    F: Fn(ServiceInstance) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<u64>> + Send + 'static,
{
    fn compute(&self, instance: ServiceInstance) -> BoxFuture<'static, Result<u64>> {
        Box::pin((self.0)(instance))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Registered, timer not armed yet
    Registered,
    /// Timer armed
    Scheduled,
    /// Computing and publishing a weight
    Refreshing,
    /// Cancelled; terminal
    Deregistered,
}

impl RefreshState {
    fn as_u8(self) -> u8 {
        match self {
            RefreshState::Registered => 0,
            RefreshState::Scheduled => 1,
            RefreshState::Refreshing => 2,
            RefreshState::Deregistered => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => RefreshState::Registered,
            1 => RefreshState::Scheduled,
            2 => RefreshState::Refreshing,
            _ => RefreshState::Deregistered,
        }
    }
}

/// Snapshot of one instance's refresh bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStatus {
    pub state: RefreshState,
    pub interval: Duration,
    /// Unix millis of the last completed refresh
    pub last_run: Option<u64>,
    pub runs: u64,
    pub failures: u64,
}

struct RefreshTask {
    key: InstanceKey,
    interval: Duration,
    policy: Arc<dyn WeightPolicy>,
    registry: InstanceRegistry,
    state: AtomicU8,
    /// Held while a refresh runs; shared with any task that replaces this one
    in_flight: Arc<Mutex<()>>,
    last_run: AtomicU64,
    runs: AtomicU64,
    failures: AtomicU64,
}

/// Result of one refresh attempt
enum Outcome {
    Published(u64),
    /// Transient; the next tick retries
    Failed(Error),
    /// The record or its session is gone; refreshing stops
    Gone(Error),
}

impl RefreshTask {
    fn state(&self) -> RefreshState {
        RefreshState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RefreshState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Move `from` -> `to` unless the task was deregistered meanwhile
    fn transition(&self, from: RefreshState, to: RefreshState) {
        let _ = self.state.compare_exchange(
            from.as_u8(),
            to.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn status(&self) -> RefreshStatus {
        let last_run = self.last_run.load(Ordering::Acquire);
        RefreshStatus {
            state: self.state(),
            interval: self.interval,
            last_run: (last_run != 0).then_some(last_run),
            runs: self.runs.load(Ordering::Acquire),
            failures: self.failures.load(Ordering::Acquire),
        }
    }

    /// Run one refresh unless one is already in flight; returns whether it ran
    async fn run_once(&self) -> bool {
        let Ok(_running) = self.in_flight.try_lock() else {
            tracing::debug!(instance = %self.key, "Refresh already in flight, skipping");
            return false;
        };
        if self.state() == RefreshState::Deregistered {
            return false;
        }

        self.transition(RefreshState::Scheduled, RefreshState::Refreshing);
        self.transition(RefreshState::Registered, RefreshState::Refreshing);
        match self.refresh().await {
            Outcome::Published(weight) => {
                tracing::debug!(instance = %self.key, weight, "Weight refreshed");
            }
            Outcome::Failed(e) => {
                self.failures.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(error = %self.failed(e), "Weight refresh failed");
            }
            Outcome::Gone(e) => {
                self.failures.fetch_add(1, Ordering::AcqRel);
                self.set_state(RefreshState::Deregistered);
                tracing::info!(instance = %self.key, reason = %e, "Instance gone, weight refresh stopped");
            }
        }
        self.runs.fetch_add(1, Ordering::AcqRel);
        self.last_run.store(timestamp_now_millis(), Ordering::Release);
        self.transition(RefreshState::Refreshing, RefreshState::Scheduled);
        true
    }

    async fn refresh(&self) -> Outcome {
        let InstanceKey {
            base_path,
            service_name,
            instance_id,
        } = &self.key;

        let current = match self
            .registry
            .query_for_instance(base_path, service_name, instance_id)
            .await
        {
            Ok(current) => current,
            Err(e) => return self.classify(e),
        };
        let weight = match self.policy.compute(current).await {
            Ok(weight) => weight,
            Err(e) => return Outcome::Failed(e),
        };
        match self
            .registry
            .update_weight(weight, base_path, service_name, instance_id)
            .await
        {
            Ok(_) => Outcome::Published(weight),
            Err(e) => self.classify(e),
        }
    }

    /// Registry errors that mean the instance will never come back
    fn classify(&self, e: Error) -> Outcome {
        match e {
            Error::Shutdown | Error::PathNotFound(_) => Outcome::Gone(e),
            Error::ConnectionError(_) if self.registry.is_closed() => Outcome::Gone(e),
            e => Outcome::Failed(e),
        }
    }

    fn failed(&self, e: Error) -> Error {
        Error::RefreshFailed {
            instance: self.key.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Reject intervals the timer cannot run on
pub(crate) fn validate_interval(interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(Error::InvalidConfig(
            "refresh interval must be positive".into(),
        ));
    }
    Ok(())
}

async fn run_loop(task: Arc<RefreshTask>, mut cancel: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + task.interval, task.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    task.transition(RefreshState::Registered, RefreshState::Scheduled);
    tracing::debug!(instance = %task.key, interval = ?task.interval, "Weight refresh scheduled");

    loop {
        tokio::select! {
            _ = &mut cancel => break,
            _ = ticker.tick() => {
                task.run_once().await;
                if task.state() == RefreshState::Deregistered {
                    break;
                }
            }
        }
    }

    task.set_state(RefreshState::Deregistered);
    tracing::debug!(instance = %task.key, "Weight refresh loop ended");
}

struct ScheduledRefresh {
    task: Arc<RefreshTask>,
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ScheduledRefresh {
    /// Stop the timer and wait out any refresh still running
    async fn stop(self) -> RefreshStatus {
        let _ = self.cancel.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!(instance = %self.task.key, error = %e, "Refresh task ended abnormally");
        }
        let _idle = self.task.in_flight.lock().await;
        self.task.set_state(RefreshState::Deregistered);
        self.task.status()
    }
}

/// Owns the per-instance refresh tasks
#[derive(Clone)]
pub struct WeightRefresher {
    registry: InstanceRegistry,
    tasks: Arc<Mutex<HashMap<InstanceKey, ScheduledRefresh>>>,
}

impl WeightRefresher {
    pub fn new(registry: InstanceRegistry) -> Self {
        Self {
            registry,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start refreshing `key` every `interval`; replaces any existing schedule for it
    pub async fn schedule(
        &self,
        key: InstanceKey,
        interval: Duration,
        policy: Arc<dyn WeightPolicy>,
    ) -> Result<()> {
        validate_interval(interval)?;

        let mut tasks = self.tasks.lock().await;
        let in_flight = tasks
            .get(&key)
            .map(|s| s.task.in_flight.clone())
            .unwrap_or_default();
        tasks.retain(|k, s| k == &key || s.task.state() != RefreshState::Deregistered);

        let task = Arc::new(RefreshTask {
            key: key.clone(),
            interval,
            policy,
            registry: self.registry.clone(),
            state: AtomicU8::new(RefreshState::Registered.as_u8()),
            in_flight,
            last_run: AtomicU64::new(0),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        let (cancel, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run_loop(task.clone(), cancel_rx));

        let previous = tasks.insert(
            key.clone(),
            ScheduledRefresh {
                task,
                cancel,
                handle,
            },
        );
        drop(tasks);
        if let Some(previous) = previous {
            tracing::info!(instance = %key, "Replacing existing refresh schedule");
            previous.stop().await;
        }
        Ok(())
    }

    /// Stop refreshing `key`; returns the final status if it was scheduled
    pub async fn cancel(&self, key: &InstanceKey) -> Option<RefreshStatus> {
        let scheduled = self.tasks.lock().await.remove(key)?;
        Some(scheduled.stop().await)
    }

    /// Refresh `key` now; `Some(false)` if a refresh is already running, `None` if not scheduled or deregistered
    pub async fn trigger(&self, key: &InstanceKey) -> Option<bool> {
        let task = self
            .tasks
            .lock()
            .await
            .get(key)
            .filter(|s| s.task.state() != RefreshState::Deregistered)
            .map(|s| s.task.clone())?;
        Some(task.run_once().await)
    }

    pub async fn status(&self, key: &InstanceKey) -> Option<RefreshStatus> {
        self.tasks.lock().await.get(key).map(|s| s.task.status())
    }

    /// Keys whose refresh is still live
    pub async fn scheduled(&self) -> Vec<InstanceKey> {
        let mut keys: Vec<_> = self
            .tasks
            .lock()
            .await
            .iter()
            .filter(|(_, s)| s.task.state() != RefreshState::Deregistered)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Cancel every task
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.tasks.lock().await.drain().collect();
        let count = drained.len();
        for (_, scheduled) in drained {
            scheduled.stop().await;
        }
        if count > 0 {
            tracing::info!(tasks = count, "Weight refresher stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_encoding() {
        for state in [
            RefreshState::Registered,
            RefreshState::Scheduled,
            RefreshState::Refreshing,
            RefreshState::Deregistered,
        ] {
            assert_eq!(RefreshState::from_u8(state.as_u8()), state);
        }
    }

    #[tokio::test]
    async fn test_fixed_and_fn_policies() {
        let instance = ServiceInstance {
            name: "api".into(),
            id: "i-1".into(),
            address: None,
            port: 80,
            ssl_port: None,
            payload: HashMap::new(),
            registration_time_utc: 0,
            service_type: Default::default(),
            uri_spec: None,
            weight: 4,
        };

        assert_eq!(FixedWeight(9).compute(instance.clone()).await.unwrap(), 9);

        let doubling = weight_fn(|inst: ServiceInstance| async move { Ok::<_, Error>(inst.weight * 2) });
        assert_eq!(doubling.compute(instance).await.unwrap(), 8);
    }
}
