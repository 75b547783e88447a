//! Policy enforcer
//!
//! Owns the current [`PolicySnapshot`] and coordinates every change to it.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────── ArcSwap<PolicySnapshot> ◀──────────┐
//!                 │                                                │ swap
//! enforce ──▶ load ──▶ matcher::evaluate ──▶ Decision              │
//!                                                                  │
//! apply ──▶ validate ──▶ writer lock ──▶ clone + mutate ──▶ adapter ──▶ check
//!                                               │                 │
//!                                               └── rollback ◀── error/timeout
//! ```
//!
//! Readers never lock: they evaluate against whichever snapshot was current
//! when they started. Writers serialize on one async mutex, build the next
//! snapshot off to the side and publish it only after the adapter has
//! acknowledged the change. Rollback is simply dropping the pending snapshot.
//!
//! Each commit clones both relations of the current snapshot, so a mutation
//! costs O(policies + groupings) in time and memory regardless of its size.
//! Reads never wait on writers.

pub mod metrics;

pub use metrics::{EngineMetrics, MetricsCollector};

use crate::adapter::{AdapterResult, PolicyAdapter};
use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::graph::RoleGraph;
use crate::matcher::{self, EffectStrategy};
use crate::store::FactStore;
use crate::types::{Decision, EnforcementRequest, GroupingTuple, PolicyTuple};
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Immutable pair of fact store and role graph that readers evaluate against
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    store: FactStore,
    graph: RoleGraph,
}

impl PolicySnapshot {
    /// Empty snapshot with the given role depth bound
    pub fn empty(max_role_depth: Option<usize>) -> Self {
        Self {
            store: FactStore::new(),
            graph: RoleGraph::with_max_depth(max_role_depth),
        }
    }

    /// Build a snapshot from loaded rows; duplicate rows collapse, empty fields fail
    pub fn from_tuples(
        policies: Vec<PolicyTuple>,
        groupings: Vec<GroupingTuple>,
        max_role_depth: Option<usize>,
    ) -> Result<Self> {
        let mut snapshot = Self::empty(max_role_depth);
        for policy in policies {
            policy.validate()?;
            snapshot.store.add_policy(policy);
        }
        for grouping in groupings {
            grouping.validate()?;
            snapshot.graph.add_edge(&grouping.member, &grouping.group);
            snapshot.store.add_grouping(grouping);
        }
        Ok(snapshot)
    }

    pub fn store(&self) -> &FactStore {
        &self.store
    }

    pub fn graph(&self) -> &RoleGraph {
        &self.graph
    }

    pub fn evaluate(&self, request: &EnforcementRequest, strategy: EffectStrategy) -> Decision {
        matcher::evaluate(&self.store, &self.graph, request, strategy)
    }

    /// Apply to both structures; the result is the fact store's
    fn apply(&mut self, mutation: &Mutation) -> bool {
        match mutation {
            Mutation::AddPolicy(policy) => self.store.add_policy(policy.clone()),
            Mutation::RemovePolicy(policy) => self.store.remove_policy(policy),
            Mutation::AddGrouping(grouping) => {
                self.graph.add_edge(&grouping.member, &grouping.group);
                self.store.add_grouping(grouping.clone())
            }
            Mutation::RemoveGrouping(grouping) => {
                self.graph.remove_edge(&grouping.member, &grouping.group);
                self.store.remove_grouping(grouping)
            }
        }
    }

    /// Role graph edges must be exactly the stored grouping tuples
    fn check_agreement(&self) -> Result<()> {
        if self.graph.edge_count() != self.store.grouping_count() {
            return Err(AuthzError::InternalInvariant(format!(
                "role graph has {} edges, fact store has {} groupings",
                self.graph.edge_count(),
                self.store.grouping_count()
            )));
        }
        if let Some(missing) = self
            .store
            .groupings()
            .find(|g| !self.graph.has_edge(&g.member, &g.group))
        {
            return Err(AuthzError::InternalInvariant(format!(
                "{} is stored but missing from the role graph",
                missing
            )));
        }
        Ok(())
    }
}

/// A single change to the policy state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    AddPolicy(PolicyTuple),
    RemovePolicy(PolicyTuple),
    AddGrouping(GroupingTuple),
    RemoveGrouping(GroupingTuple),
}

impl Mutation {
    pub fn validate(&self) -> Result<()> {
        match self {
            Mutation::AddPolicy(p) | Mutation::RemovePolicy(p) => p.validate(),
            Mutation::AddGrouping(g) | Mutation::RemoveGrouping(g) => g.validate(),
        }
    }

    /// The mutation that undoes this one
    pub fn inverse(&self) -> Mutation {
        match self {
            Mutation::AddPolicy(p) => Mutation::RemovePolicy(p.clone()),
            Mutation::RemovePolicy(p) => Mutation::AddPolicy(p.clone()),
            Mutation::AddGrouping(g) => Mutation::RemoveGrouping(g.clone()),
            Mutation::RemoveGrouping(g) => Mutation::AddGrouping(g.clone()),
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::AddPolicy(p) => write!(f, "add {}", p),
            Mutation::RemovePolicy(p) => write!(f, "remove {}", p),
            Mutation::AddGrouping(g) => write!(f, "add {}", g),
            Mutation::RemoveGrouping(g) => write!(f, "remove {}", g),
        }
    }
}

/// RBAC enforcer backed by a persistence adapter
pub struct Enforcer {
    adapter: Arc<dyn PolicyAdapter>,

    /// Current published state
    snapshot: ArcSwap<PolicySnapshot>,

    /// Serializes mutations and reloads
    writer: Mutex<()>,

    /// Set when the published state can no longer be trusted
    poisoned: AtomicBool,

    metrics: Option<MetricsCollector>,

    config: EngineConfig,
}

impl Enforcer {
    /// Create an enforcer and load every tuple from `adapter`
    ///
    /// Fails if the configuration is invalid or the load fails; no enforcer
    /// is returned with partial state.
    pub async fn open(config: EngineConfig, adapter: Arc<dyn PolicyAdapter>) -> Result<Self> {
        config.validate()?;

        let metrics = config.enable_metrics.then(MetricsCollector::new);
        let enforcer = Self {
            adapter,
            snapshot: ArcSwap::from_pointee(PolicySnapshot::empty(config.max_role_depth)),
            writer: Mutex::new(()),
            poisoned: AtomicBool::new(false),
            metrics,
            config,
        };

        enforcer.load_all().await?;
        Ok(enforcer)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The currently published snapshot
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot.load_full()
    }

    /// Whether mutations are refused until the next successful `load_all`
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Counter snapshot, `None` when metrics are disabled
    pub fn metrics(&self) -> Option<EngineMetrics> {
        self.metrics.as_ref().map(MetricsCollector::get_metrics)
    }

    pub fn export_prometheus(&self) -> Option<String> {
        self.metrics.as_ref().map(MetricsCollector::export_prometheus)
    }

    /// Replace the in-memory state with everything the adapter holds
    ///
    /// On failure the previous snapshot stays published. On success the
    /// poisoned flag is cleared.
    pub async fn load_all(&self) -> Result<()> {
        let _guard = self.writer.lock().await;

        let (policies, groupings) = self
            .adapter
            .load_all()
            .await
            .map_err(|e| AuthzError::Load(e.to_string()))?;

        let snapshot = PolicySnapshot::from_tuples(policies, groupings, self.config.max_role_depth)
            .map_err(|e| AuthzError::Load(e.to_string()))?;

        info!(
            "Loaded {} policies and {} groupings",
            snapshot.store.policy_count(),
            snapshot.store.grouping_count()
        );

        self.snapshot.store(Arc::new(snapshot));
        self.poisoned.store(false, Ordering::SeqCst);
        self.record(MetricsCollector::record_load);
        Ok(())
    }

    // ---- enforcement ----

    /// Whether `subject` may perform `action` on `object`
    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> bool {
        self.enforce_ex(subject, object, action).allowed
    }

    /// Like [`enforce`](Self::enforce), with the deciding rule
    pub fn enforce_ex(&self, subject: &str, object: &str, action: &str) -> Decision {
        let request = EnforcementRequest::new(subject, object, action);
        let decision = self.snapshot.load().evaluate(&request, self.config.effect);

        debug!(
            "Enforce {} {} {} -> {:?}",
            subject, object, action, decision.reason
        );
        self.record(|m| m.record_decision(decision.allowed));
        decision
    }

    /// Same evaluation as [`enforce`](Self::enforce)
    pub fn has_permission(&self, user: &str, object: &str, action: &str) -> bool {
        self.enforce(user, object, action)
    }

    // ---- queries ----

    pub fn get_policies(&self) -> Vec<PolicyTuple> {
        self.snapshot.load().store.list_policies()
    }

    pub fn get_grouping_policies(&self) -> Vec<GroupingTuple> {
        self.snapshot.load().store.list_groupings()
    }

    /// Every role `user` holds, directly or through the hierarchy (sorted)
    pub fn get_roles_for_user(&self, user: &str) -> Vec<String> {
        let roles = self.snapshot.load().graph.roles_of(user);
        sorted(roles.iter().cloned())
    }

    /// Every name that holds `role`, directly or through the hierarchy (sorted)
    pub fn get_users_for_role(&self, role: &str) -> Vec<String> {
        sorted(self.snapshot.load().graph.members_of(role))
    }

    /// Every rule that applies to `user`, including those inherited from roles
    pub fn get_permissions_for_user(&self, user: &str) -> Vec<PolicyTuple> {
        let snapshot = self.snapshot.load();
        matcher::permissions_for(&snapshot.store, &snapshot.graph, user)
    }

    pub fn get_all_subjects(&self) -> Vec<String> {
        self.snapshot.load().store.all_subjects()
    }

    pub fn get_all_objects(&self) -> Vec<String> {
        self.snapshot.load().store.all_objects()
    }

    pub fn get_all_actions(&self) -> Vec<String> {
        self.snapshot.load().store.all_actions()
    }

    pub fn get_all_roles(&self) -> Vec<String> {
        self.snapshot.load().store.all_roles()
    }

    // ---- mutations ----

    pub async fn add_policy(&self, subject: &str, object: &str, action: &str) -> Result<bool> {
        self.apply(Mutation::AddPolicy(PolicyTuple::new(subject, object, action)))
            .await
    }

    pub async fn remove_policy(&self, subject: &str, object: &str, action: &str) -> Result<bool> {
        self.apply(Mutation::RemovePolicy(PolicyTuple::new(subject, object, action)))
            .await
    }

    pub async fn add_permission_for_user(&self, user: &str, object: &str, action: &str) -> Result<bool> {
        self.add_policy(user, object, action).await
    }

    pub async fn remove_permission_for_user(
        &self,
        user: &str,
        object: &str,
        action: &str,
    ) -> Result<bool> {
        self.remove_policy(user, object, action).await
    }

    /// Assign `role` to `user` (or nest role `user` under `role`)
    pub async fn add_grouping_policy(&self, user: &str, role: &str) -> Result<bool> {
        self.apply(Mutation::AddGrouping(GroupingTuple::new(user, role)))
            .await
    }

    pub async fn remove_grouping_policy(&self, user: &str, role: &str) -> Result<bool> {
        self.apply(Mutation::RemoveGrouping(GroupingTuple::new(user, role)))
            .await
    }

    pub async fn delete_role_for_user(&self, user: &str, role: &str) -> Result<bool> {
        self.remove_grouping_policy(user, role).await
    }

    /// Add every tuple in one step; returns how many were new
    pub async fn add_policies(&self, policies: Vec<PolicyTuple>) -> Result<usize> {
        self.apply_batch(policies.into_iter().map(Mutation::AddPolicy).collect())
            .await
    }

    /// Remove every tuple in one step; returns how many were present
    pub async fn remove_policies(&self, policies: Vec<PolicyTuple>) -> Result<usize> {
        self.apply_batch(policies.into_iter().map(Mutation::RemovePolicy).collect())
            .await
    }

    /// Remove every grouping in which `user` is the member
    pub async fn delete_user(&self, user: &str) -> Result<bool> {
        require_name("user", user)?;
        let changed = self
            .commit(|snapshot| {
                snapshot
                    .store
                    .direct_groups(user)
                    .iter()
                    .map(|group| Mutation::RemoveGrouping(GroupingTuple::new(user, group.as_str())))
                    .collect()
            })
            .await?;
        Ok(changed > 0)
    }

    /// Remove every grouping that names `role` on either side and every rule granted to it
    pub async fn delete_role(&self, role: &str) -> Result<bool> {
        require_name("role", role)?;
        let changed = self
            .commit(|snapshot| {
                let memberships = snapshot
                    .store
                    .direct_members(role)
                    .iter()
                    .map(|member| Mutation::RemoveGrouping(GroupingTuple::new(member.as_str(), role)));
                let parents = snapshot
                    .store
                    .direct_groups(role)
                    .iter()
                    .map(|group| Mutation::RemoveGrouping(GroupingTuple::new(role, group.as_str())));
                let rules = snapshot
                    .store
                    .policies()
                    .filter(|p| p.subject == role)
                    .map(|p| Mutation::RemovePolicy(p.clone()));
                memberships.chain(parents).chain(rules).collect()
            })
            .await?;
        Ok(changed > 0)
    }

    /// Apply one mutation; `Ok(false)` if it was already in effect
    pub async fn apply(&self, mutation: Mutation) -> Result<bool> {
        let changed = self.apply_batch(vec![mutation]).await?;
        Ok(changed > 0)
    }

    /// Apply mutations in order under one writer section and one swap
    ///
    /// Either every mutation takes effect or none does. Returns the number of
    /// mutations that changed state.
    pub async fn apply_batch(&self, mutations: Vec<Mutation>) -> Result<usize> {
        if let Err(err) = mutations.iter().try_for_each(Mutation::validate) {
            self.record(MetricsCollector::record_failure);
            return Err(err);
        }
        self.commit(move |_| mutations).await
    }

    /// Writer section: plan against the current snapshot, persist, publish
    async fn commit<F>(&self, plan: F) -> Result<usize>
    where
        F: FnOnce(&PolicySnapshot) -> Vec<Mutation> + Send,
    {
        let _guard = self.writer.lock().await;

        if self.is_poisoned() {
            self.record(MetricsCollector::record_failure);
            return Err(AuthzError::Poisoned);
        }

        let (pending, changed) = {
            let current = self.snapshot.load();
            let mutations = plan(&**current);
            let mut pending = PolicySnapshot::clone(&current);
            let changed: Vec<Mutation> = mutations
                .into_iter()
                .filter(|m| pending.apply(m))
                .collect();
            (pending, changed)
        };

        if changed.is_empty() {
            debug!("Mutation already in effect, nothing to persist");
            self.record(|m| m.record_mutation(false));
            return Ok(0);
        }

        let mut persisted: Vec<&Mutation> = Vec::with_capacity(changed.len());
        for mutation in &changed {
            if let Err(err) = self.persist(mutation).await {
                warn!("Failed to persist {}, rolling back: {}", mutation, err);
                // A timed-out call may still land; undo it first
                if matches!(err, AuthzError::PersistenceTimeout(_)) {
                    persisted.push(mutation);
                }
                self.compensate(&persisted).await;
                self.record(|m| {
                    m.record_rollback();
                    m.record_failure();
                });
                return Err(err);
            }
            persisted.push(mutation);
        }

        self.publish(pending)?;

        for mutation in &changed {
            info!("Applied {}", mutation);
            self.record(|m| m.record_mutation(true));
        }
        Ok(changed.len())
    }

    /// Persist one mutation with timeout and transient-failure retries
    async fn persist(&self, mutation: &Mutation) -> Result<()> {
        let timeout = self.config.persist_timeout();
        let max_retries = self.config.max_persist_retries;
        let mut attempt = 0;

        loop {
            match tokio::time::timeout(timeout, self.call_adapter(mutation)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) if err.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    warn!(
                        "Transient failure persisting {} (retry {}/{}): {}",
                        mutation, attempt, max_retries, err
                    );
                    self.record(MetricsCollector::record_retry);
                    tokio::time::sleep(self.config.retry_backoff()).await;
                }
                Ok(Err(err)) => return Err(AuthzError::Persistence(err)),
                // Not retried; the caller compensates instead
                Err(_) => return Err(AuthzError::PersistenceTimeout(timeout)),
            }
        }
    }

    async fn call_adapter(&self, mutation: &Mutation) -> AdapterResult<()> {
        match mutation {
            Mutation::AddPolicy(p) => self.adapter.persist_add_policy(p).await,
            Mutation::RemovePolicy(p) => self.adapter.persist_remove_policy(p).await,
            Mutation::AddGrouping(g) => self.adapter.persist_add_grouping(g).await,
            Mutation::RemoveGrouping(g) => self.adapter.persist_remove_grouping(g).await,
        }
    }

    /// Undo the writes of a failed batch that may have landed, newest first
    async fn compensate(&self, persisted: &[&Mutation]) {
        for mutation in persisted.iter().rev() {
            let inverse = mutation.inverse();
            if let Err(err) = self.persist(&inverse).await {
                self.poisoned.store(true, Ordering::SeqCst);
                error!(
                    "Failed to compensate with {}; adapter diverges until reload: {}",
                    inverse, err
                );
            }
        }
    }

    /// Verify and swap in the pending snapshot, or poison the enforcer
    fn publish(&self, pending: PolicySnapshot) -> Result<()> {
        if let Err(err) = pending.check_agreement() {
            self.poisoned.store(true, Ordering::SeqCst);
            error!("Mutations disabled until reload: {}", err);
            self.record(MetricsCollector::record_failure);
            return Err(err);
        }
        self.snapshot.store(Arc::new(pending));
        Ok(())
    }

    fn record<F: FnOnce(&MetricsCollector)>(&self, f: F) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}

impl fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("Enforcer")
            .field("policies", &snapshot.store.policy_count())
            .field("groupings", &snapshot.store.grouping_count())
            .field("poisoned", &self.is_poisoned())
            .field("config", &self.config)
            .finish()
    }
}

fn require_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AuthzError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn sorted(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut values: Vec<String> = values.into_iter().collect();
    values.sort();
    values
}
