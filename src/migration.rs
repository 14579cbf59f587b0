//! Migration definition

use crate::dependency::SwappableDependency;
use crate::graph::MigrationKey;
use crate::namer;
use crate::operations::Operation;
use serde::{Deserialize, Serialize};

/// A generated migration: an ordered list of operations for one app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Migration {
	/// Migration name (e.g., "0001_initial"); `auto_N` until arranged
	pub name: String,

	/// App label
	pub app_label: String,

	/// Operations to apply, in order
	pub operations: Vec<Operation>,

	/// Dependencies (app_label, migration_name)
	pub dependencies: Vec<MigrationKey>,

	/// Whether this is the first migration of its app
	pub initial: bool,

	/// Dependencies on whichever app a swappable setting selects
	#[serde(default)]
	pub swappable_dependencies: Vec<SwappableDependency>,
}

impl Migration {
	/// Create a new migration
	///
	/// # Examples
	///
	/// ```rust
	/// use reinhardt_autodetector::Migration;
	///
	/// let migration = Migration::new("0001_initial", "blog")
	/// 	.add_dependency("auth", "0001_initial")
	/// 	.initial(true);
	/// assert_eq!(migration.id(), "blog.0001_initial");
	/// assert_eq!(migration.dependencies.len(), 1);
	/// ```
	pub fn new(name: impl Into<String>, app_label: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			app_label: app_label.into(),
			..Self::default()
		}
	}

	/// Add an operation
	pub fn add_operation(mut self, operation: impl Into<Operation>) -> Self {
		self.operations.push(operation.into());
		self
	}

	/// Add a dependency, ignoring duplicates
	pub fn add_dependency(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
		self.push_dependency(MigrationKey::new(app_label, name));
		self
	}

	/// Add a swappable dependency, ignoring duplicates
	pub fn add_swappable_dependency(mut self, dependency: SwappableDependency) -> Self {
		if !self.swappable_dependencies.contains(&dependency) {
			self.swappable_dependencies.push(dependency);
		}
		self
	}

	pub fn initial(mut self, initial: bool) -> Self {
		self.initial = initial;
		self
	}

	pub(crate) fn push_dependency(&mut self, key: MigrationKey) {
		if !self.dependencies.contains(&key) {
			self.dependencies.push(key);
		}
	}

	/// Full identifier `app_label.name`
	pub fn id(&self) -> String {
		format!("{}.{}", self.app_label, self.name)
	}

	pub fn key(&self) -> MigrationKey {
		MigrationKey::new(self.app_label.clone(), self.name.clone())
	}

	/// Name derived from the operations, see [`namer::suggest_name`].
	pub fn suggest_name(&self) -> String {
		namer::suggest_name(&self.operations, self.initial)
	}

	/// Migration as pretty-printed JSON, for previews and snapshots.
	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string_pretty(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::operations::{AddField, DeleteModel};
	use crate::state::FieldState;
	use rstest::rstest;

	#[rstest]
	fn test_duplicate_dependencies_are_ignored() {
		let migration = Migration::new("0002_auto", "blog")
			.add_dependency("blog", "0001_initial")
			.add_dependency("blog", "0001_initial");

		assert_eq!(migration.dependencies, vec![MigrationKey::new("blog", "0001_initial")]);
	}

	#[rstest]
	fn test_suggest_name_uses_operations() {
		let migration = Migration::new("auto_1", "blog")
			.add_operation(AddField::new("Post", "slug", FieldState::char(50)))
			.add_operation(DeleteModel::new("Draft"));

		assert_eq!(migration.suggest_name(), "post_slug_delete_draft");
	}

	#[rstest]
	fn test_json_preview_contains_operations() {
		let migration = Migration::new("0002_post_slug", "blog")
			.add_operation(AddField::new("Post", "slug", FieldState::char(50)));

		let json = migration.to_json().unwrap();

		assert!(json.contains("\"AddField\""), "{json}");
		assert!(json.contains("\"slug\""));
	}
}
