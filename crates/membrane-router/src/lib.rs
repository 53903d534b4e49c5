// Hierarchy routing: paths climb to the lowest common ancestor and back down.
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("cycle detected in parent chain at {0}")]
    CycleDetected(String),
    #[error("no common ancestor between {from} and {to}")]
    NoCommonAncestor { from: String, to: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    parent: Option<String>,
    // Namespace the node was discovered in; `None` means "same as everyone else".
    scope: Option<String>,
}

/// Snapshot of parent pointers used to compute delivery hops.
///
/// Parent pointers are not guaranteed to form a tree: they may dangle (point at
/// ids missing from the snapshot) or loop. Dangling parents end a chain; loops
/// fail with [`RouteError::CycleDetected`].
///
/// ```
/// use membrane_router::Hierarchy;
///
/// let mut hierarchy = Hierarchy::new();
/// hierarchy.insert("root", None);
/// hierarchy.insert("left", Some("root"));
/// hierarchy.insert("right", Some("root"));
/// let path = hierarchy.route("left", "right").expect("route");
/// assert_eq!(path, vec!["left", "root", "right"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    nodes: HashMap<String, Node>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a hierarchy from `(id, parent)` pairs.
    pub fn from_edges<I, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<S>)>,
        S: Into<String>,
    {
        let mut hierarchy = Self::new();
        for (id, parent) in edges {
            hierarchy.nodes.insert(
                id.into(),
                Node {
                    parent: parent.map(Into::into),
                    scope: None,
                },
            );
        }
        hierarchy
    }

    pub fn insert(&mut self, id: impl Into<String>, parent: Option<&str>) {
        self.nodes.insert(
            id.into(),
            Node {
                parent: parent.map(str::to_string),
                scope: None,
            },
        );
    }

    /// Insert a node tagged with the namespace it belongs to.
    ///
    /// Roots in different scopes share no sentinel, so routing between them
    /// fails with [`RouteError::NoCommonAncestor`].
    pub fn insert_scoped(
        &mut self,
        id: impl Into<String>,
        parent: Option<&str>,
        scope: impl Into<String>,
    ) {
        self.nodes.insert(
            id.into(),
            Node {
                parent: parent.map(str::to_string),
                scope: Some(scope.into()),
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).and_then(|node| node.parent.as_deref())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Chain from `id` up to its root, starting with `id` itself.
    ///
    /// Ids missing from the snapshot yield a single-element chain.
    pub fn ancestors(&self, id: &str) -> Result<Vec<String>, RouteError> {
        let mut chain = vec![id.to_string()];
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(id);
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            if !self.nodes.contains_key(parent) {
                // Dangling pointer: the parent never registered, so the chain ends here.
                break;
            }
            if !seen.insert(parent) {
                return Err(RouteError::CycleDetected(parent.to_string()));
            }
            chain.push(parent.to_string());
            current = parent;
        }
        Ok(chain)
    }

    /// Lowest common ancestor of two nodes, if their chains meet.
    pub fn lowest_common_ancestor(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Option<String>, RouteError> {
        let up = self.ancestors(source)?;
        let down: HashSet<String> = self.ancestors(target)?.into_iter().collect();
        Ok(up.into_iter().find(|id| down.contains(id)))
    }

    /// Ordered hops from `source` to `target` through their lowest common ancestor.
    ///
    /// The path starts at `source`, ends at `target`, and visits the ancestor
    /// exactly once. When the chains never meet, their roots are treated as
    /// siblings under the shared namespace unless both carry different scopes.
    pub fn route(&self, source: &str, target: &str) -> Result<Vec<String>, RouteError> {
        if source == target {
            return Ok(vec![source.to_string()]);
        }
        let up = self.ancestors(source)?;
        let down = self.ancestors(target)?;
        let down_index: HashMap<&str, usize> = down
            .iter()
            .enumerate()
            .map(|(index, id)| (id.as_str(), index))
            .collect();

        // Walk upwards from the source; the first shared node is the nearest one.
        let meeting = up
            .iter()
            .enumerate()
            .find_map(|(index, id)| down_index.get(id.as_str()).map(|&j| (index, j)));

        if let Some((i, j)) = meeting {
            let mut path: Vec<String> = up[..=i].to_vec();
            path.extend(down[..j].iter().rev().cloned());
            return Ok(path);
        }

        if let (Some(a), Some(b)) = (self.scope_of(source), self.scope_of(target))
            && a != b
        {
            return Err(RouteError::NoCommonAncestor {
                from: source.to_string(),
                to: target.to_string(),
            });
        }

        let mut path = up;
        path.extend(down.into_iter().rev());
        Ok(path)
    }

    fn scope_of(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).and_then(|node| node.scope.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Hierarchy {
        // root
        // ├── a
        // │   ├── a1
        // │   └── a2
        // │       └── a2x
        // └── b
        //     └── b1
        Hierarchy::from_edges([
            ("root", None),
            ("a", Some("root")),
            ("a1", Some("a")),
            ("a2", Some("a")),
            ("a2x", Some("a2")),
            ("b", Some("root")),
            ("b1", Some("b")),
        ])
    }

    #[test]
    fn self_route_is_single_hop() {
        let hierarchy = tree();
        assert_eq!(hierarchy.route("a2", "a2").expect("route"), vec!["a2"]);
    }

    #[test]
    fn parent_to_child_goes_straight_down() {
        let hierarchy = Hierarchy::from_edges([("root", None), ("child", Some("root"))]);
        assert_eq!(
            hierarchy.route("root", "child").expect("route"),
            vec!["root", "child"]
        );
        assert_eq!(
            hierarchy.route("child", "root").expect("route"),
            vec!["child", "root"]
        );
    }

    #[test]
    fn siblings_meet_at_shared_parent() {
        let hierarchy = tree();
        assert_eq!(
            hierarchy.route("a1", "a2x").expect("route"),
            vec!["a1", "a", "a2", "a2x"]
        );
    }

    #[test]
    fn cousins_route_through_root_once() {
        let hierarchy = tree();
        let path = hierarchy.route("a2x", "b1").expect("route");
        assert_eq!(path, vec!["a2x", "a2", "a", "root", "b", "b1"]);
        assert_eq!(path.iter().filter(|hop| *hop == "root").count(), 1);
    }

    #[test]
    fn every_pair_in_tree_visits_lca_once_without_repeats() {
        let hierarchy = tree();
        let ids = ["root", "a", "a1", "a2", "a2x", "b", "b1"];
        for source in ids {
            for target in ids {
                let path = hierarchy.route(source, target).expect("route");
                assert_eq!(path.first().map(String::as_str), Some(source));
                assert_eq!(path.last().map(String::as_str), Some(target));
                let unique: HashSet<&String> = path.iter().collect();
                assert_eq!(unique.len(), path.len(), "{source}->{target}: {path:?}");
                let lca = hierarchy
                    .lowest_common_ancestor(source, target)
                    .expect("lca")
                    .expect("tree has a root");
                assert_eq!(path.iter().filter(|hop| **hop == lca).count(), 1);
            }
        }
    }

    #[test]
    fn cycle_is_reported() {
        let hierarchy =
            Hierarchy::from_edges([("x", Some("y")), ("y", Some("z")), ("z", Some("x"))]);
        let err = hierarchy.route("x", "outside").expect_err("cycle");
        assert!(matches!(err, RouteError::CycleDetected(_)));
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let hierarchy = Hierarchy::from_edges([("loop", Some("loop")), ("other", None)]);
        assert_eq!(
            hierarchy.ancestors("loop").expect_err("cycle"),
            RouteError::CycleDetected("loop".to_string())
        );
    }

    #[test]
    fn dangling_parent_ends_the_chain() {
        let hierarchy = Hierarchy::from_edges([("orphan", Some("ghost")), ("root", None)]);
        assert_eq!(hierarchy.ancestors("orphan").expect("chain"), vec!["orphan"]);
    }

    #[test]
    fn unknown_node_degenerates_to_itself() {
        let hierarchy = tree();
        assert_eq!(hierarchy.ancestors("stranger").expect("chain"), vec!["stranger"]);
        assert_eq!(
            hierarchy.route("stranger", "a1").expect("route"),
            vec!["stranger", "root", "a", "a1"]
        );
    }

    #[test]
    fn separate_roots_in_same_scope_are_siblings() {
        let mut hierarchy = Hierarchy::new();
        hierarchy.insert_scoped("r1", None, "ns");
        hierarchy.insert_scoped("c1", Some("r1"), "ns");
        hierarchy.insert_scoped("r2", None, "ns");
        assert_eq!(
            hierarchy.route("c1", "r2").expect("route"),
            vec!["c1", "r1", "r2"]
        );
    }

    #[test]
    fn disjoint_scopes_have_no_common_ancestor() {
        let mut hierarchy = Hierarchy::new();
        hierarchy.insert_scoped("r1", None, "ns-a");
        hierarchy.insert_scoped("r2", None, "ns-b");
        assert_eq!(
            hierarchy.route("r1", "r2").expect_err("disjoint"),
            RouteError::NoCommonAncestor {
                from: "r1".to_string(),
                to: "r2".to_string(),
            }
        );
    }

    #[test]
    fn no_common_ancestor_is_a_plain_error() {
        let err = RouteError::NoCommonAncestor {
            from: "r1".to_string(),
            to: "r2".to_string(),
        };
        assert_eq!(err.to_string(), "no common ancestor between r1 and r2");
        assert!(std::error::Error::source(&err).is_none());
    }
}
