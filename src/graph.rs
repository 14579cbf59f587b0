//! Existing migration graph
//!
//! The autodetector only needs a read view of migrations already on disk:
//! which apps have migrations, their leaf nodes and their names (for
//! numbering).

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Placeholder for "the first migration of an app".
pub const FIRST_MIGRATION: &str = "__first__";
/// Placeholder for "the latest migration of an app".
pub const LATEST_MIGRATION: &str = "__latest__";

/// `(app_label, migration_name)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MigrationKey {
	pub app_label: String,
	pub name: String,
}

impl MigrationKey {
	pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			app_label: app_label.into(),
			name: name.into(),
		}
	}

	pub fn is_placeholder(&self) -> bool {
		self.name == FIRST_MIGRATION || self.name == LATEST_MIGRATION
	}
}

impl fmt::Display for MigrationKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.app_label, self.name)
	}
}

impl From<(&str, &str)> for MigrationKey {
	fn from((app_label, name): (&str, &str)) -> Self {
		Self::new(app_label, name)
	}
}

/// Directed graph of existing migrations; edges run from a dependency to
/// its dependent.
#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
	graph: DiGraph<MigrationKey, ()>,
	nodes: HashMap<MigrationKey, NodeIndex>,
}

impl MigrationGraph {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_node(&mut self, key: MigrationKey) -> NodeIndex {
		if let Some(&idx) = self.nodes.get(&key) {
			return idx;
		}
		let idx = self.graph.add_node(key.clone());
		self.nodes.insert(key, idx);
		idx
	}

	/// Record that `child` depends on `parent`, adding either node if needed.
	pub fn add_dependency(&mut self, child: MigrationKey, parent: MigrationKey) {
		let child = self.add_node(child);
		let parent = self.add_node(parent);
		self.graph.update_edge(parent, child, ());
	}

	pub fn contains(&self, key: &MigrationKey) -> bool {
		self.nodes.contains_key(key)
	}

	pub fn has_app(&self, app_label: &str) -> bool {
		self.nodes.keys().any(|k| k.app_label == app_label)
	}

	pub fn apps(&self) -> BTreeSet<String> {
		self.nodes.keys().map(|k| k.app_label.clone()).collect()
	}

	/// Names of every migration of `app_label`, sorted.
	pub fn app_migrations(&self, app_label: &str) -> Vec<&str> {
		let mut names: Vec<&str> = self
			.nodes
			.keys()
			.filter(|k| k.app_label == app_label)
			.map(|k| k.name.as_str())
			.collect();
		names.sort_unstable();
		names
	}

	/// Migrations of `app_label` that no other migration of the same app
	/// depends on, sorted. More than one leaf means the app has a conflict.
	///
	/// # Example
	///
	/// ```rust
	/// use reinhardt_autodetector::{MigrationGraph, MigrationKey};
	///
	/// let mut graph = MigrationGraph::new();
	/// graph.add_dependency(
	/// 	MigrationKey::new("blog", "0002_post_slug"),
	/// 	MigrationKey::new("blog", "0001_initial"),
	/// );
	/// assert_eq!(graph.leaf_nodes("blog"), vec![MigrationKey::new("blog", "0002_post_slug")]);
	/// ```
	pub fn leaf_nodes(&self, app_label: &str) -> Vec<MigrationKey> {
		let mut leaves: Vec<MigrationKey> = self
			.graph
			.node_indices()
			.filter(|&idx| self.graph[idx].app_label == app_label)
			.filter(|&idx| {
				!self
					.graph
					.neighbors_directed(idx, Direction::Outgoing)
					.any(|child| self.graph[child].app_label == app_label)
			})
			.map(|idx| self.graph[idx].clone())
			.collect();
		leaves.sort();
		leaves
	}

	/// The leaf new migrations of `app_label` should build on.
	pub fn leaf(&self, app_label: &str) -> Option<MigrationKey> {
		self.leaf_nodes(app_label).into_iter().next()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_cross_app_children_do_not_hide_leaves() {
		let mut graph = MigrationGraph::new();
		graph.add_dependency(
			MigrationKey::new("shop", "0001_initial"),
			MigrationKey::new("accounts", "0001_initial"),
		);

		assert_eq!(
			graph.leaf_nodes("accounts"),
			vec![MigrationKey::new("accounts", "0001_initial")]
		);
	}

	#[rstest]
	fn test_conflicting_leaves_are_all_reported() {
		let mut graph = MigrationGraph::new();
		let initial = MigrationKey::new("shop", "0001_initial");
		graph.add_dependency(MigrationKey::new("shop", "0002_b"), initial.clone());
		graph.add_dependency(MigrationKey::new("shop", "0002_a"), initial);

		let leaves = graph.leaf_nodes("shop");

		assert_eq!(leaves.len(), 2);
		assert_eq!(graph.leaf("shop"), Some(MigrationKey::new("shop", "0002_a")));
	}

	#[rstest]
	fn test_unknown_app_has_no_leaf() {
		let graph = MigrationGraph::new();

		assert!(graph.leaf("shop").is_none());
		assert!(!graph.has_app("shop"));
	}
}
