//! Fact store: the `p` (permission) and `g` (grouping) relations
//!
//! Both relations keep insertion order for listing and carry the indexes
//! evaluation needs:
//!
//! - `(object, action)` → policies, so a request only looks at candidate rules
//! - `member` → groups and `group` → members for direct grouping lookups
//!
//! The store is plain data. It is owned by a [`PolicySnapshot`](crate::engine::PolicySnapshot)
//! and only ever mutated on a private copy held by the mutation coordinator.

use crate::types::{GroupingTuple, PolicyTuple};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Insertion-ordered set with O(log n) removal
#[derive(Debug, Clone)]
struct OrderedRelation<T> {
    rows: BTreeMap<u64, T>,
    seq_of: HashMap<T, u64>,
    next_seq: u64,
}

impl<T: Clone + Eq + std::hash::Hash> OrderedRelation<T> {
    fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            seq_of: HashMap::new(),
            next_seq: 0,
        }
    }

    fn insert(&mut self, row: T) -> bool {
        if self.seq_of.contains_key(&row) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.seq_of.insert(row.clone(), seq);
        self.rows.insert(seq, row);
        true
    }

    fn remove(&mut self, row: &T) -> bool {
        match self.seq_of.remove(row) {
            Some(seq) => {
                self.rows.remove(&seq);
                true
            }
            None => false,
        }
    }

    fn contains(&self, row: &T) -> bool {
        self.seq_of.contains_key(row)
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// In-memory fact store
#[derive(Debug, Clone)]
pub struct FactStore {
    policies: OrderedRelation<PolicyTuple>,
    groupings: OrderedRelation<GroupingTuple>,

    /// object -> action -> matching policies, in insertion order
    policy_index: HashMap<String, HashMap<String, Vec<PolicyTuple>>>,

    /// member -> direct groups
    groups_of: HashMap<String, Vec<String>>,

    /// group -> direct members
    members_of: HashMap<String, Vec<String>>,
}

impl FactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            policies: OrderedRelation::new(),
            groupings: OrderedRelation::new(),
            policy_index: HashMap::new(),
            groups_of: HashMap::new(),
            members_of: HashMap::new(),
        }
    }

    /// Insert a policy; `false` if it was already present
    pub fn add_policy(&mut self, policy: PolicyTuple) -> bool {
        if !self.policies.insert(policy.clone()) {
            return false;
        }
        self.policy_index
            .entry(policy.object.clone())
            .or_default()
            .entry(policy.action.clone())
            .or_default()
            .push(policy);
        true
    }

    /// Remove a policy; `true` iff it was present
    pub fn remove_policy(&mut self, policy: &PolicyTuple) -> bool {
        if !self.policies.remove(policy) {
            return false;
        }
        if let Some(by_action) = self.policy_index.get_mut(&policy.object) {
            if let Some(bucket) = by_action.get_mut(&policy.action) {
                bucket.retain(|p| p != policy);
                if bucket.is_empty() {
                    by_action.remove(&policy.action);
                }
            }
            if by_action.is_empty() {
                self.policy_index.remove(&policy.object);
            }
        }
        true
    }

    /// Insert a grouping edge; `false` if it was already present
    pub fn add_grouping(&mut self, grouping: GroupingTuple) -> bool {
        if !self.groupings.insert(grouping.clone()) {
            return false;
        }
        self.groups_of
            .entry(grouping.member.clone())
            .or_default()
            .push(grouping.group.clone());
        self.members_of
            .entry(grouping.group)
            .or_default()
            .push(grouping.member);
        true
    }

    /// Remove a grouping edge; `true` iff it was present
    pub fn remove_grouping(&mut self, grouping: &GroupingTuple) -> bool {
        if !self.groupings.remove(grouping) {
            return false;
        }
        detach(&mut self.groups_of, &grouping.member, &grouping.group);
        detach(&mut self.members_of, &grouping.group, &grouping.member);
        true
    }

    pub fn has_policy(&self, policy: &PolicyTuple) -> bool {
        self.policies.contains(policy)
    }

    pub fn has_grouping(&self, grouping: &GroupingTuple) -> bool {
        self.groupings.contains(grouping)
    }

    /// All policies in insertion order
    pub fn list_policies(&self) -> Vec<PolicyTuple> {
        self.policies.iter().cloned().collect()
    }

    /// All grouping edges in insertion order
    pub fn list_groupings(&self) -> Vec<GroupingTuple> {
        self.groupings.iter().cloned().collect()
    }

    pub(crate) fn groupings(&self) -> impl Iterator<Item = &GroupingTuple> {
        self.groupings.iter()
    }

    pub(crate) fn policies(&self) -> impl Iterator<Item = &PolicyTuple> {
        self.policies.iter()
    }

    /// Candidate policies for an (object, action) pair
    pub fn policies_for(&self, object: &str, action: &str) -> &[PolicyTuple] {
        self.policy_index
            .get(object)
            .and_then(|by_action| by_action.get(action))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Groups `member` belongs to directly
    pub fn direct_groups(&self, member: &str) -> &[String] {
        self.groups_of.get(member).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct members of `group`
    pub fn direct_members(&self, group: &str) -> &[String] {
        self.members_of.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    pub fn grouping_count(&self) -> usize {
        self.groupings.len()
    }

    /// Distinct policy subjects
    pub fn all_subjects(&self) -> Vec<String> {
        distinct(self.policies.iter().map(|p| p.subject.as_str()))
    }

    /// Distinct policy objects
    pub fn all_objects(&self) -> Vec<String> {
        distinct(self.policies.iter().map(|p| p.object.as_str()))
    }

    /// Distinct policy actions
    pub fn all_actions(&self) -> Vec<String> {
        distinct(self.policies.iter().map(|p| p.action.as_str()))
    }

    /// Distinct `group` values across grouping edges
    pub fn all_roles(&self) -> Vec<String> {
        distinct(self.groupings.iter().map(|g| g.group.as_str()))
    }
}

impl Default for FactStore {
    fn default() -> Self {
        Self::new()
    }
}

fn detach(index: &mut HashMap<String, Vec<String>>, key: &str, value: &str) {
    if let Some(values) = index.get_mut(key) {
        values.retain(|v| v != value);
        if values.is_empty() {
            index.remove(key);
        }
    }
}

/// First-seen order, duplicates dropped
fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| seen.insert(*v))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_policy_is_idempotent() {
        let mut store = FactStore::new();
        let policy = PolicyTuple::new("alice", "data1", "read");

        assert!(store.add_policy(policy.clone()));
        assert!(!store.add_policy(policy.clone()));
        assert_eq!(store.list_policies(), vec![policy]);
        assert_eq!(store.policies_for("data1", "read").len(), 1);
    }

    #[test]
    fn test_allow_and_deny_are_distinct_rows() {
        let mut store = FactStore::new();
        assert!(store.add_policy(PolicyTuple::new("alice", "data1", "read")));
        assert!(store.add_policy(PolicyTuple::deny("alice", "data1", "read")));
        assert_eq!(store.policy_count(), 2);
    }

    #[test]
    fn test_remove_policy() {
        let mut store = FactStore::new();
        let policy = PolicyTuple::new("alice", "data1", "read");

        assert!(!store.remove_policy(&policy));
        store.add_policy(policy.clone());
        assert!(store.remove_policy(&policy));
        assert!(!store.has_policy(&policy));
        assert!(store.policies_for("data1", "read").is_empty());
        assert!(store.list_policies().is_empty());
    }

    #[test]
    fn test_listing_keeps_insertion_order() {
        let mut store = FactStore::new();
        let a = PolicyTuple::new("carol", "data3", "read");
        let b = PolicyTuple::new("alice", "data1", "read");
        let c = PolicyTuple::new("bob", "data2", "write");

        store.add_policy(a.clone());
        store.add_policy(b.clone());
        store.add_policy(c.clone());
        store.remove_policy(&b);
        store.add_policy(b.clone());

        assert_eq!(store.list_policies(), vec![a, c, b]);
    }

    #[test]
    fn test_grouping_indexes() {
        let mut store = FactStore::new();
        assert!(store.add_grouping(GroupingTuple::new("alice", "admin")));
        assert!(store.add_grouping(GroupingTuple::new("bob", "admin")));
        assert!(store.add_grouping(GroupingTuple::new("alice", "dev")));
        assert!(!store.add_grouping(GroupingTuple::new("alice", "admin")));

        assert_eq!(store.direct_groups("alice"), ["admin", "dev"]);
        assert_eq!(store.direct_members("admin"), ["alice", "bob"]);

        assert!(store.remove_grouping(&GroupingTuple::new("alice", "admin")));
        assert!(!store.remove_grouping(&GroupingTuple::new("alice", "admin")));
        assert_eq!(store.direct_groups("alice"), ["dev"]);
        assert_eq!(store.direct_members("admin"), ["bob"]);
        assert_eq!(store.grouping_count(), 2);
    }

    #[test]
    fn test_projections() {
        let mut store = FactStore::new();
        store.add_policy(PolicyTuple::new("alice", "data1", "read"));
        store.add_policy(PolicyTuple::new("bob", "data2", "write"));
        store.add_policy(PolicyTuple::new("alice", "data2", "read"));
        store.add_grouping(GroupingTuple::new("carol", "admin"));
        store.add_grouping(GroupingTuple::new("admin", "root"));
        store.add_grouping(GroupingTuple::new("dave", "admin"));

        assert_eq!(store.all_subjects(), ["alice", "bob"]);
        assert_eq!(store.all_objects(), ["data1", "data2"]);
        assert_eq!(store.all_actions(), ["read", "write"]);
        // "admin" appears as a member too, but only group-side values count
        assert_eq!(store.all_roles(), ["admin", "root"]);
    }
}
