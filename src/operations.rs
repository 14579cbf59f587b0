//! Migration operations
//!
//! Each operation is a plain struct that knows how to replay itself onto a
//! [`ProjectState`] and how to name itself. [`Operation`] wraps them for
//! storage in a [`crate::Migration`].

pub mod fields;
pub mod models;
pub mod special;

pub use fields::{AddField, AlterField, RemoveField, RenameField};
pub use models::{
	AddConstraint, AddIndex, AlterModelManagers, AlterModelOptions, AlterModelTable,
	AlterModelTableComment, AlterOrderWithRespectTo, AlterUniqueTogether, CreateModel,
	DeleteModel, RemoveConstraint, RemoveIndex, RenameIndex, RenameModel,
};
pub use special::RunSql;

use crate::Result;
use crate::state::ProjectState;
use serde::{Deserialize, Serialize};

/// Behaviour shared by every operation.
pub trait MigrationOperation {
	/// Fragment used to build a migration name, or `None` when the
	/// operation has no natural name.
	fn migration_name_fragment(&self) -> Option<String>;

	/// Human-readable one-line description.
	fn describe(&self) -> String;

	/// Apply the operation to `state` as part of a migration of `app_label`.
	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
	CreateModel(CreateModel),
	DeleteModel(DeleteModel),
	RenameModel(RenameModel),
	AlterModelTable(AlterModelTable),
	AlterModelTableComment(AlterModelTableComment),
	AlterModelOptions(AlterModelOptions),
	AlterModelManagers(AlterModelManagers),
	AlterUniqueTogether(AlterUniqueTogether),
	AlterOrderWithRespectTo(AlterOrderWithRespectTo),
	AddField(AddField),
	RemoveField(RemoveField),
	AlterField(AlterField),
	RenameField(RenameField),
	AddIndex(AddIndex),
	RemoveIndex(RemoveIndex),
	RenameIndex(RenameIndex),
	AddConstraint(AddConstraint),
	RemoveConstraint(RemoveConstraint),
	RunSql(RunSql),
}

macro_rules! dispatch {
	($self:ident, $op:ident => $body:expr) => {
		match $self {
			Operation::CreateModel($op) => $body,
			Operation::DeleteModel($op) => $body,
			Operation::RenameModel($op) => $body,
			Operation::AlterModelTable($op) => $body,
			Operation::AlterModelTableComment($op) => $body,
			Operation::AlterModelOptions($op) => $body,
			Operation::AlterModelManagers($op) => $body,
			Operation::AlterUniqueTogether($op) => $body,
			Operation::AlterOrderWithRespectTo($op) => $body,
			Operation::AddField($op) => $body,
			Operation::RemoveField($op) => $body,
			Operation::AlterField($op) => $body,
			Operation::RenameField($op) => $body,
			Operation::AddIndex($op) => $body,
			Operation::RemoveIndex($op) => $body,
			Operation::RenameIndex($op) => $body,
			Operation::AddConstraint($op) => $body,
			Operation::RemoveConstraint($op) => $body,
			Operation::RunSql($op) => $body,
		}
	};
}

macro_rules! impl_from {
	($($variant:ident),* $(,)?) => {
		$(
			impl From<$variant> for Operation {
				fn from(op: $variant) -> Self {
					Operation::$variant(op)
				}
			}
		)*
	};
}

impl_from!(
	CreateModel,
	DeleteModel,
	RenameModel,
	AlterModelTable,
	AlterModelTableComment,
	AlterModelOptions,
	AlterModelManagers,
	AlterUniqueTogether,
	AlterOrderWithRespectTo,
	AddField,
	RemoveField,
	AlterField,
	RenameField,
	AddIndex,
	RemoveIndex,
	RenameIndex,
	AddConstraint,
	RemoveConstraint,
	RunSql,
);

impl Operation {
	/// Variant name, e.g. `"AddField"`.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::CreateModel(_) => "CreateModel",
			Self::DeleteModel(_) => "DeleteModel",
			Self::RenameModel(_) => "RenameModel",
			Self::AlterModelTable(_) => "AlterModelTable",
			Self::AlterModelTableComment(_) => "AlterModelTableComment",
			Self::AlterModelOptions(_) => "AlterModelOptions",
			Self::AlterModelManagers(_) => "AlterModelManagers",
			Self::AlterUniqueTogether(_) => "AlterUniqueTogether",
			Self::AlterOrderWithRespectTo(_) => "AlterOrderWithRespectTo",
			Self::AddField(_) => "AddField",
			Self::RemoveField(_) => "RemoveField",
			Self::AlterField(_) => "AlterField",
			Self::RenameField(_) => "RenameField",
			Self::AddIndex(_) => "AddIndex",
			Self::RemoveIndex(_) => "RemoveIndex",
			Self::RenameIndex(_) => "RenameIndex",
			Self::AddConstraint(_) => "AddConstraint",
			Self::RemoveConstraint(_) => "RemoveConstraint",
			Self::RunSql(_) => "RunSql",
		}
	}

	/// Lowercased name of the model the operation targets.
	pub fn model_name_lower(&self) -> Option<String> {
		let name = match self {
			Self::CreateModel(op) => &op.name,
			Self::DeleteModel(op) => &op.name,
			Self::RenameModel(op) => &op.new_name,
			Self::AlterModelTable(op) => &op.name,
			Self::AlterModelTableComment(op) => &op.name,
			Self::AlterModelOptions(op) => &op.name,
			Self::AlterModelManagers(op) => &op.name,
			Self::AlterUniqueTogether(op) => &op.name,
			Self::AlterOrderWithRespectTo(op) => &op.name,
			Self::AddField(op) => &op.model_name,
			Self::RemoveField(op) => &op.model_name,
			Self::AlterField(op) => &op.model_name,
			Self::RenameField(op) => &op.model_name,
			Self::AddIndex(op) => &op.model_name,
			Self::RemoveIndex(op) => &op.model_name,
			Self::RenameIndex(op) => &op.model_name,
			Self::AddConstraint(op) => &op.model_name,
			Self::RemoveConstraint(op) => &op.model_name,
			Self::RunSql(_) => return None,
		};
		Some(name.to_lowercase())
	}

	/// Field name for field-level operations (the new name for renames).
	pub fn field_name(&self) -> Option<&str> {
		match self {
			Self::AddField(op) => Some(&op.name),
			Self::RemoveField(op) => Some(&op.name),
			Self::AlterField(op) => Some(&op.name),
			Self::RenameField(op) => Some(&op.new_name),
			_ => None,
		}
	}
}

impl MigrationOperation for Operation {
	fn migration_name_fragment(&self) -> Option<String> {
		dispatch!(self, op => op.migration_name_fragment())
	}

	fn describe(&self) -> String {
		dispatch!(self, op => op.describe())
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		dispatch!(self, op => op.state_forwards(app_label, state))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::{FieldState, ModelKey, ModelOptions};
	use rstest::rstest;

	#[rstest]
	fn test_operation_dispatches_to_wrapped_struct() {
		let op: Operation = AddField::new("Post", "Slug", FieldState::char(50)).into();

		assert_eq!(op.kind(), "AddField");
		assert_eq!(op.model_name_lower().as_deref(), Some("post"));
		assert_eq!(op.field_name(), Some("Slug"));
		assert_eq!(op.migration_name_fragment().as_deref(), Some("post_slug"));
		assert_eq!(op.describe(), "Add field Slug to Post");
	}

	#[rstest]
	fn test_replaying_a_sequence() {
		let mut state = ProjectState::new();
		let ops: Vec<Operation> = vec![
			CreateModel::new(
				"Post",
				vec![("id".to_string(), FieldState::auto())],
				ModelOptions::default(),
			)
			.into(),
			AddField::new("Post", "title", FieldState::char(100)).into(),
			RenameField::new("Post", "title", "headline").into(),
			RunSql::new("SELECT 1").into(),
		];

		for op in &ops {
			state.apply("blog", op).unwrap();
		}

		let post = state.get_model(&ModelKey::new("blog", "post")).unwrap();
		assert!(post.fields.contains_key("headline"));
		assert!(!post.fields.contains_key("title"));
	}

	#[rstest]
	fn test_run_sql_has_no_name_fragment() {
		let op: Operation = RunSql::new("SELECT 1").with_reverse_sql("SELECT 2").into();

		assert!(op.migration_name_fragment().is_none());
		assert!(op.model_name_lower().is_none());
	}
}
