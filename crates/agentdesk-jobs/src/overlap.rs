//! Overlap policy for consecutive firings of one recurring job.
//!
//! When a job's next tick arrives while the previous firing is still
//! running, the policy decides whether the new firing waits for it or runs
//! alongside it. The guard also counts in-flight firings so shutdown can wait
//! for them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};

/// Policy for handling overlapping firings of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// A firing waits until the previous one has completed.
    #[default]
    Wait,

    /// Firings may run concurrently.
    Concurrent,
}

impl OverlapPolicy {
    /// Map the `wait_for_completion` flag onto a policy.
    pub fn from_wait_for_completion(wait: bool) -> Self {
        if wait {
            OverlapPolicy::Wait
        } else {
            OverlapPolicy::Concurrent
        }
    }
}

/// Serializes firings under `OverlapPolicy::Wait` and counts running ones.
pub struct OverlapGuard {
    policy: OverlapPolicy,
    gate: Arc<Mutex<()>>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl OverlapGuard {
    /// Create a new overlap guard with the given policy.
    pub fn new(policy: OverlapPolicy) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            policy,
            gate: Arc::new(Mutex::new(())),
            in_flight: Arc::new(in_flight),
        }
    }

    /// Acquire the right to run one firing.
    ///
    /// - `Wait`: resolves once no other firing of this job holds a guard.
    /// - `Concurrent`: resolves immediately.
    pub async fn acquire(&self) -> RunGuard {
        let permit = match self.policy {
            OverlapPolicy::Wait => Some(self.gate.clone().lock_owned().await),
            OverlapPolicy::Concurrent => None,
        };
        self.in_flight.send_modify(|n| *n += 1);
        RunGuard {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        }
    }

    /// Number of firings currently holding a guard.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Whether at least one firing is running.
    pub fn is_running(&self) -> bool {
        self.in_flight() > 0
    }

    /// Wait until no firing holds a guard.
    pub async fn idle(&self) {
        let mut receiver = self.in_flight.subscribe();
        let _ = receiver.wait_for(|n| *n == 0).await;
    }

    /// Get the overlap policy.
    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }
}

/// RAII guard that releases the firing slot when dropped, even if the
/// firing panicked.
pub struct RunGuard {
    _permit: Option<OwnedMutexGuard<()>>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}
