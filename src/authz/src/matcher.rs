//! Matcher and effect evaluation
//!
//! A policy `p` matches a request `r` iff
//!
//! ```text
//! is_member(r.subject, p.subject) && r.object == p.object && r.action == p.action
//! ```
//!
//! The `(object, action)` index of the fact store narrows the candidates, so
//! only the subject test walks the role graph. The matching rules are then
//! combined by an [`EffectStrategy`].

use crate::graph::RoleGraph;
use crate::store::FactStore;
use crate::types::{Decision, EnforcementRequest, PolicyEffect, PolicyTuple};
use serde::{Deserialize, Serialize};

/// How matching rules combine into a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectStrategy {
    /// Allow iff some allow rule matches and no deny rule matches
    #[default]
    DenyOverride,

    /// Allow iff some allow rule matches; deny rules never override
    AllowOverride,
}

/// Whether `policy` applies to `request`
pub fn matches(graph: &RoleGraph, policy: &PolicyTuple, request: &EnforcementRequest) -> bool {
    request.object == policy.object
        && request.action == policy.action
        && graph.is_member(&request.subject, &policy.subject)
}

/// Evaluate a request against a fact store and role graph
pub fn evaluate(
    store: &FactStore,
    graph: &RoleGraph,
    request: &EnforcementRequest,
    strategy: EffectStrategy,
) -> Decision {
    let mut first_allow: Option<&PolicyTuple> = None;
    let mut first_deny: Option<&PolicyTuple> = None;

    for policy in store.policies_for(&request.object, &request.action) {
        if !graph.is_member(&request.subject, &policy.subject) {
            continue;
        }
        match policy.effect {
            PolicyEffect::Allow => {
                if strategy == EffectStrategy::AllowOverride {
                    return Decision::allow(policy.clone());
                }
                first_allow.get_or_insert(policy);
            }
            PolicyEffect::Deny => {
                if strategy == EffectStrategy::DenyOverride {
                    return Decision::deny(policy.clone());
                }
                first_deny.get_or_insert(policy);
            }
        }
    }

    match (first_allow, first_deny) {
        (Some(allow), _) => Decision::allow(allow.clone()),
        (None, Some(deny)) => Decision::deny(deny.clone()),
        (None, None) => Decision::no_match(),
    }
}

/// Every rule that applies to `user` through its role closure
pub fn permissions_for(store: &FactStore, graph: &RoleGraph, user: &str) -> Vec<PolicyTuple> {
    let roles = graph.roles_of(user);
    store
        .policies()
        .filter(|p| p.subject == user || roles.contains(&p.subject))
        .cloned()
        .collect()
}
