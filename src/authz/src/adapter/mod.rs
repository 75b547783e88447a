//! Persistence adapters
//!
//! An adapter is the I/O boundary of the engine. It loads every tuple once at
//! startup and persists each acknowledged mutation. It holds no view of the
//! in-memory policy state.
//!
//! Adapters classify failures as [`AdapterErrorKind::Transient`] (worth a
//! retry: connection drops, pool exhaustion) or
//! [`AdapterErrorKind::Permanent`] (constraint violations, bad data). The
//! mutation coordinator retries only the former.

use crate::types::{GroupingTuple, PolicyTuple};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresAdapter;

/// Failure class reported by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// Retrying may succeed
    Transient,
    /// Retrying will not help
    Permanent,
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterErrorKind::Transient => f.write_str("transient"),
            AdapterErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Adapter error
#[derive(Debug, Clone, Error)]
#[error("{kind} adapter error: {message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == AdapterErrorKind::Transient
    }
}

/// Result type for adapter calls
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Persistence adapter trait
///
/// Persist calls must be idempotent: storing a tuple that is already stored,
/// or deleting one that is absent, succeeds without effect. The coordinator
/// relies on this when it undoes a write whose outcome is unknown.
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Read every stored policy and grouping tuple
    async fn load_all(&self) -> AdapterResult<(Vec<PolicyTuple>, Vec<GroupingTuple>)>;

    /// Store a policy tuple
    async fn persist_add_policy(&self, policy: &PolicyTuple) -> AdapterResult<()>;

    /// Delete a policy tuple
    async fn persist_remove_policy(&self, policy: &PolicyTuple) -> AdapterResult<()>;

    /// Store a grouping tuple
    async fn persist_add_grouping(&self, grouping: &GroupingTuple) -> AdapterResult<()>;

    /// Delete a grouping tuple
    async fn persist_remove_grouping(&self, grouping: &GroupingTuple) -> AdapterResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    policies: Vec<PolicyTuple>,
    groupings: Vec<GroupingTuple>,
    /// Outcome of upcoming calls; `None` lets a call through
    faults: VecDeque<Option<AdapterErrorKind>>,
    stall: Option<Duration>,
    /// Delays applied after the write of upcoming calls
    late_acks: VecDeque<Duration>,
    calls: usize,
}

/// In-memory adapter
///
/// Keeps tuples for the life of the process. Faults can be injected to
/// exercise the coordinator's retry, timeout and rollback paths. A stall
/// delays a call before it writes; a late acknowledgement delays it after.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    /// Create an empty adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter that already holds the given tuples
    pub fn with_tuples(policies: Vec<PolicyTuple>, groupings: Vec<GroupingTuple>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                policies,
                groupings,
                ..Default::default()
            }),
        }
    }

    /// Fail the next `count` calls with `kind`
    pub fn fail_next(&self, count: usize, kind: AdapterErrorKind) {
        let mut state = self.state.lock();
        state.faults.extend(std::iter::repeat(Some(kind)).take(count));
    }

    /// Let the next `successes` calls through, then fail one with `kind`
    pub fn fail_after(&self, successes: usize, kind: AdapterErrorKind) {
        let mut state = self.state.lock();
        state.faults.extend(std::iter::repeat(None).take(successes));
        state.faults.push_back(Some(kind));
    }

    /// Delay every call by `duration` (None to stop stalling)
    pub fn stall(&self, duration: Option<Duration>) {
        self.state.lock().stall = duration;
    }

    /// Let the next `count` calls write, then hold their reply for `delay`
    pub fn ack_late(&self, count: usize, delay: Duration) {
        let mut state = self.state.lock();
        state.late_acks.extend(std::iter::repeat(delay).take(count));
    }

    /// Drop pending faults, stalls and late acknowledgements
    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.faults.clear();
        state.stall = None;
        state.late_acks.clear();
    }

    /// Number of calls received, failed ones included
    pub fn call_count(&self) -> usize {
        self.state.lock().calls
    }

    pub fn persisted_policies(&self) -> Vec<PolicyTuple> {
        self.state.lock().policies.clone()
    }

    pub fn persisted_groupings(&self) -> Vec<GroupingTuple> {
        self.state.lock().groupings.clone()
    }

    /// Count the call, then apply any stall and injected fault
    ///
    /// Returns the delay to hold the reply for once the write is done.
    async fn enter(&self, op: &str) -> AdapterResult<Option<Duration>> {
        let (stall, fault, late_ack) = {
            let mut state = self.state.lock();
            state.calls += 1;
            (
                state.stall,
                state.faults.pop_front().flatten(),
                state.late_acks.pop_front(),
            )
        };

        if let Some(duration) = stall {
            tokio::time::sleep(duration).await;
        }

        match fault {
            Some(kind) => {
                debug!("Injected {} fault on {}", kind, op);
                Err(AdapterError {
                    kind,
                    message: format!("injected failure on {}", op),
                })
            }
            None => Ok(late_ack),
        }
    }

    async fn acknowledge(op: &str, late_ack: Option<Duration>) -> AdapterResult<()> {
        if let Some(delay) = late_ack {
            debug!("Holding acknowledgement of {} for {:?}", op, delay);
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyAdapter for MemoryAdapter {
    async fn load_all(&self) -> AdapterResult<(Vec<PolicyTuple>, Vec<GroupingTuple>)> {
        let late_ack = self.enter("load_all").await?;
        let tuples = {
            let state = self.state.lock();
            (state.policies.clone(), state.groupings.clone())
        };
        Self::acknowledge("load_all", late_ack).await?;
        Ok(tuples)
    }

    async fn persist_add_policy(&self, policy: &PolicyTuple) -> AdapterResult<()> {
        let late_ack = self.enter("persist_add_policy").await?;
        {
            let mut state = self.state.lock();
            if !state.policies.contains(policy) {
                state.policies.push(policy.clone());
            }
        }
        Self::acknowledge("persist_add_policy", late_ack).await
    }

    async fn persist_remove_policy(&self, policy: &PolicyTuple) -> AdapterResult<()> {
        let late_ack = self.enter("persist_remove_policy").await?;
        self.state.lock().policies.retain(|p| p != policy);
        Self::acknowledge("persist_remove_policy", late_ack).await
    }

    async fn persist_add_grouping(&self, grouping: &GroupingTuple) -> AdapterResult<()> {
        let late_ack = self.enter("persist_add_grouping").await?;
        {
            let mut state = self.state.lock();
            if !state.groupings.contains(grouping) {
                state.groupings.push(grouping.clone());
            }
        }
        Self::acknowledge("persist_add_grouping", late_ack).await
    }

    async fn persist_remove_grouping(&self, grouping: &GroupingTuple) -> AdapterResult<()> {
        let late_ack = self.enter("persist_remove_grouping").await?;
        self.state.lock().groupings.retain(|g| g != grouping);
        Self::acknowledge("persist_remove_grouping", late_ack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_adapter_round_trip() {
        let adapter = MemoryAdapter::new();
        let policy = PolicyTuple::new("alice", "data1", "read");
        let grouping = GroupingTuple::new("bob", "alice");

        adapter.persist_add_policy(&policy).await.unwrap();
        adapter.persist_add_policy(&policy).await.unwrap();
        adapter.persist_add_grouping(&grouping).await.unwrap();

        let (policies, groupings) = adapter.load_all().await.unwrap();
        assert_eq!(policies, vec![policy.clone()]);
        assert_eq!(groupings, vec![grouping.clone()]);

        adapter.persist_remove_policy(&policy).await.unwrap();
        adapter.persist_remove_grouping(&grouping).await.unwrap();
        assert!(adapter.persisted_policies().is_empty());
        assert!(adapter.persisted_groupings().is_empty());
        assert_eq!(adapter.call_count(), 6);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_in_order() {
        let adapter = MemoryAdapter::new();
        adapter.fail_next(1, AdapterErrorKind::Transient);
        adapter.fail_next(1, AdapterErrorKind::Permanent);
        let policy = PolicyTuple::new("alice", "data1", "read");

        let first = adapter.persist_add_policy(&policy).await.unwrap_err();
        assert!(first.is_transient());
        let second = adapter.persist_add_policy(&policy).await.unwrap_err();
        assert_eq!(second.kind, AdapterErrorKind::Permanent);
        adapter.persist_add_policy(&policy).await.unwrap();

        assert_eq!(adapter.persisted_policies(), vec![policy]);
    }

    #[tokio::test]
    async fn test_fail_after() {
        let adapter = MemoryAdapter::new();
        adapter.fail_after(2, AdapterErrorKind::Permanent);

        assert!(adapter.load_all().await.is_ok());
        assert!(adapter.load_all().await.is_ok());
        assert!(adapter.load_all().await.is_err());
        assert!(adapter.load_all().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_delays_calls() {
        let adapter = MemoryAdapter::new();
        adapter.stall(Some(Duration::from_secs(2)));

        let started = tokio::time::Instant::now();
        adapter.load_all().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));

        adapter.clear_faults();
        let started = tokio::time::Instant::now();
        adapter.load_all().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ack_writes_before_replying() {
        let adapter = MemoryAdapter::new();
        adapter.ack_late(1, Duration::from_secs(5));
        let policy = PolicyTuple::new("alice", "data1", "read");

        let pending = tokio::time::timeout(
            Duration::from_millis(100),
            adapter.persist_add_policy(&policy),
        )
        .await;
        assert!(pending.is_err());
        assert_eq!(adapter.persisted_policies(), vec![policy.clone()]);

        // Only the queued call is delayed
        let started = tokio::time::Instant::now();
        adapter.persist_remove_policy(&policy).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(adapter.persisted_policies().is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = AdapterError::transient("connection reset");
        assert_eq!(err.to_string(), "transient adapter error: connection reset");
    }
}
