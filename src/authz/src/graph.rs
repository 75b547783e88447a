//! Role graph: transitive closure over grouping edges
//!
//! Every grouping tuple `(member, group)` is an edge `member → group`. A
//! subject holds every role reachable from it. The graph may contain cycles;
//! traversal is breadth-first with a visited set, so every query terminates in
//! O(V + E) and all nodes on a cycle are members of each other.
//!
//! # Caching
//!
//! `roles_of` memoizes the upward closure per member in a [`DashMap`]. A graph
//! is never mutated once it is published in a snapshot, so the cache needs no
//! invalidation: cloning the graph to build the next snapshot starts a fresh,
//! empty cache.
//!
//! # Example
//!
//! ```rust
//! use gatehouse_authz::graph::RoleGraph;
//!
//! let mut graph = RoleGraph::new();
//! graph.add_edge("alice", "admin");
//! graph.add_edge("admin", "superadmin");
//!
//! assert!(graph.is_member("alice", "superadmin"));
//! assert!(!graph.is_member("superadmin", "alice"));
//! ```

use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Directed membership graph with optional traversal depth bound
#[derive(Debug)]
pub struct RoleGraph {
    /// member -> groups it belongs to directly
    up: HashMap<String, HashSet<String>>,

    /// group -> its direct members
    down: HashMap<String, HashSet<String>>,

    edge_count: usize,

    /// Maximum number of edges followed from the start node (None = unbounded)
    max_depth: Option<usize>,

    /// Memoized upward closures, keyed by member
    closure_cache: DashMap<String, Arc<HashSet<String>>>,
}

impl RoleGraph {
    /// Create an empty, unbounded graph
    pub fn new() -> Self {
        Self::with_max_depth(None)
    }

    /// Create an empty graph that stops expanding after `max_depth` edges
    pub fn with_max_depth(max_depth: Option<usize>) -> Self {
        Self {
            up: HashMap::new(),
            down: HashMap::new(),
            edge_count: 0,
            max_depth,
            closure_cache: DashMap::new(),
        }
    }

    /// Build a graph from a list of `(member, group)` edges
    pub fn from_edges<'a, I>(edges: I, max_depth: Option<usize>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut graph = Self::with_max_depth(max_depth);
        for (member, group) in edges {
            graph.add_edge(member, group);
        }
        graph
    }

    /// Add `member → group`; `false` if the edge already existed
    pub fn add_edge(&mut self, member: &str, group: &str) -> bool {
        let inserted = self
            .up
            .entry(member.to_string())
            .or_default()
            .insert(group.to_string());
        if !inserted {
            return false;
        }
        self.down
            .entry(group.to_string())
            .or_default()
            .insert(member.to_string());
        self.edge_count += 1;
        self.closure_cache.clear();
        true
    }

    /// Remove `member → group`; `false` if the edge did not exist
    pub fn remove_edge(&mut self, member: &str, group: &str) -> bool {
        let removed = match self.up.get_mut(member) {
            Some(groups) => groups.remove(group),
            None => false,
        };
        if !removed {
            return false;
        }
        if self.up.get(member).is_some_and(HashSet::is_empty) {
            self.up.remove(member);
        }
        if let Some(members) = self.down.get_mut(group) {
            members.remove(member);
            if members.is_empty() {
                self.down.remove(group);
            }
        }
        self.edge_count -= 1;
        self.closure_cache.clear();
        true
    }

    pub fn has_edge(&self, member: &str, group: &str) -> bool {
        self.up.get(member).is_some_and(|groups| groups.contains(group))
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Whether `member` is `group` or reaches it through grouping edges
    pub fn is_member(&self, member: &str, group: &str) -> bool {
        if member == group {
            return true;
        }
        self.roles_of(member).contains(group)
    }

    /// All groups reachable from `member`
    ///
    /// `member` itself is only included when a cycle leads back to it.
    pub fn roles_of(&self, member: &str) -> Arc<HashSet<String>> {
        if !self.up.contains_key(member) {
            return Arc::new(HashSet::new());
        }
        if let Some(cached) = self.closure_cache.get(member) {
            return Arc::clone(cached.value());
        }

        let closure = Arc::new(self.reach(member, &self.up));
        self.closure_cache
            .insert(member.to_string(), Arc::clone(&closure));
        closure
    }

    /// All members that reach `group`
    ///
    /// `group` itself is only included when a cycle leads back to it.
    pub fn members_of(&self, group: &str) -> HashSet<String> {
        if !self.down.contains_key(group) {
            return HashSet::new();
        }
        self.reach(group, &self.down)
    }

    /// Breadth-first reachability along `edges`, guarded by a visited set
    fn reach(&self, start: &str, edges: &HashMap<String, HashSet<String>>) -> HashSet<String> {
        let mut reached: HashSet<String> = HashSet::new();
        let mut expanded: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();

        expanded.insert(start);
        queue.push_back((start, 0));

        while let Some((node, depth)) = queue.pop_front() {
            if self.max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            let Some(next) = edges.get(node) else {
                continue;
            };
            for neighbour in next {
                reached.insert(neighbour.clone());
                if expanded.insert(neighbour.as_str()) {
                    queue.push_back((neighbour.as_str(), depth + 1));
                }
            }
        }

        reached
    }
}

impl Clone for RoleGraph {
    fn clone(&self) -> Self {
        Self {
            up: self.up.clone(),
            down: self.down.clone(),
            edge_count: self.edge_count,
            max_depth: self.max_depth,
            closure_cache: DashMap::new(),
        }
    }
}

impl Default for RoleGraph {
    fn default() -> Self {
        Self::new()
    }
}
