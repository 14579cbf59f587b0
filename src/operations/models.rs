//! Model-level operations

use super::MigrationOperation;
use crate::deconstruct::Value;
use crate::state::{
	ConstraintState, FieldState, IndexState, ManagerState, ModelBase, ModelKey, ModelOptions,
	ModelState, ProjectState,
};
use crate::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Create a model and its table
///
/// # Example
///
/// ```rust
/// use reinhardt_autodetector::{CreateModel, FieldState, MigrationOperation, ModelKey, ModelOptions, ProjectState};
///
/// let mut state = ProjectState::new();
/// let create = CreateModel::new(
/// 	"Author",
/// 	vec![("id".to_string(), FieldState::auto())],
/// 	ModelOptions::default(),
/// );
/// create.state_forwards("library", &mut state).unwrap();
///
/// assert!(state.contains(&ModelKey::new("library", "author")));
/// assert_eq!(create.migration_name_fragment().as_deref(), Some("author"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateModel {
	pub name: String,
	pub fields: Vec<(String, FieldState)>,
	pub options: ModelOptions,
	pub bases: Vec<ModelBase>,
	pub managers: Vec<(String, ManagerState)>,
}

impl CreateModel {
	pub fn new(name: impl Into<String>, fields: Vec<(String, FieldState)>, options: ModelOptions) -> Self {
		Self {
			name: name.into(),
			fields,
			options,
			bases: vec![ModelBase::default()],
			managers: Vec::new(),
		}
	}

	pub fn with_bases(mut self, bases: Vec<ModelBase>) -> Self {
		self.bases = bases;
		self
	}

	pub fn with_managers(mut self, managers: Vec<(String, ManagerState)>) -> Self {
		self.managers = managers;
		self
	}

	pub fn name_lower(&self) -> String {
		self.name.to_lowercase()
	}

	pub fn field(&self, name: &str) -> Option<&FieldState> {
		self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
	}
}

impl MigrationOperation for CreateModel {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(self.name_lower())
	}

	fn describe(&self) -> String {
		format!(
			"Create {}model {}",
			if self.options.proxy { "proxy " } else { "" },
			self.name
		)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		state.add_model(ModelState {
			app_label: app_label.to_string(),
			name: self.name.clone(),
			fields: self.fields.iter().cloned().collect(),
			options: self.options.clone(),
			bases: self.bases.clone(),
			managers: self.managers.clone(),
		});
		Ok(())
	}
}

/// Drop a model and its table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteModel {
	pub name: String,
}

impl DeleteModel {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into() }
	}

	pub fn name_lower(&self) -> String {
		self.name.to_lowercase()
	}
}

impl MigrationOperation for DeleteModel {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("delete_{}", self.name_lower()))
	}

	fn describe(&self) -> String {
		format!("Delete model {}", self.name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		let key = ModelKey::new(app_label, &self.name);
		state
			.remove_model(&key)
			.map(|_| ())
			.ok_or_else(|| MigrationError::ModelNotFound(key.to_string()))
	}
}

/// Rename a model, re-pointing every relation to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameModel {
	pub old_name: String,
	pub new_name: String,
}

impl RenameModel {
	pub fn new(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
		Self {
			old_name: old_name.into(),
			new_name: new_name.into(),
		}
	}

	pub fn old_name_lower(&self) -> String {
		self.old_name.to_lowercase()
	}

	pub fn new_name_lower(&self) -> String {
		self.new_name.to_lowercase()
	}
}

impl MigrationOperation for RenameModel {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("rename_{}_{}", self.old_name_lower(), self.new_name_lower()))
	}

	fn describe(&self) -> String {
		format!("Rename model {} to {}", self.old_name, self.new_name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		let old_key = ModelKey::new(app_label, &self.old_name);
		let new_key = ModelKey::new(app_label, &self.new_name);
		let mut model = state
			.remove_model(&old_key)
			.ok_or_else(|| MigrationError::ModelNotFound(old_key.to_string()))?;
		model.name = self.new_name.clone();
		state.add_model(model);
		state.repoint_relations(&old_key, &new_key);
		Ok(())
	}
}

/// Change the table name of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterModelTable {
	pub name: String,
	pub table: Option<String>,
}

impl AlterModelTable {
	pub fn new(name: impl Into<String>, table: Option<String>) -> Self {
		Self { name: name.into(), table }
	}
}

impl MigrationOperation for AlterModelTable {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("alter_{}_table", self.name.to_lowercase()))
	}

	fn describe(&self) -> String {
		match &self.table {
			Some(table) => format!("Rename table for {} to {}", self.name, table),
			None => format!("Rename table for {} to (default)", self.name),
		}
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		state
			.model_mut(&ModelKey::new(app_label, &self.name))?
			.options
			.db_table = self.table.clone();
		Ok(())
	}
}

/// Change the table comment of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterModelTableComment {
	pub name: String,
	pub table_comment: Option<String>,
}

impl AlterModelTableComment {
	pub fn new(name: impl Into<String>, table_comment: Option<String>) -> Self {
		Self {
			name: name.into(),
			table_comment,
		}
	}
}

impl MigrationOperation for AlterModelTableComment {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("alter_{}_table_comment", self.name.to_lowercase()))
	}

	fn describe(&self) -> String {
		format!("Alter {} table comment", self.name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		state
			.model_mut(&ModelKey::new(app_label, &self.name))?
			.options
			.db_table_comment = self.table_comment.clone();
		Ok(())
	}
}

/// Replace the options that have no dedicated operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterModelOptions {
	pub name: String,
	pub options: BTreeMap<String, Value>,
}

impl AlterModelOptions {
	pub fn new(name: impl Into<String>, options: BTreeMap<String, Value>) -> Self {
		Self {
			name: name.into(),
			options,
		}
	}
}

impl MigrationOperation for AlterModelOptions {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("alter_{}_options", self.name.to_lowercase()))
	}

	fn describe(&self) -> String {
		format!("Change Meta options on {}", self.name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		state
			.model_mut(&ModelKey::new(app_label, &self.name))?
			.options
			.apply_alterable(&self.options)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterModelManagers {
	pub name: String,
	pub managers: Vec<(String, ManagerState)>,
}

impl AlterModelManagers {
	pub fn new(name: impl Into<String>, managers: Vec<(String, ManagerState)>) -> Self {
		Self {
			name: name.into(),
			managers,
		}
	}
}

impl MigrationOperation for AlterModelManagers {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("alter_{}_managers", self.name.to_lowercase()))
	}

	fn describe(&self) -> String {
		format!("Change managers on {}", self.name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		state.model_mut(&ModelKey::new(app_label, &self.name))?.managers = self.managers.clone();
		Ok(())
	}
}

/// Replace the `unique_together` set of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterUniqueTogether {
	pub name: String,
	pub unique_together: BTreeSet<Vec<String>>,
}

impl AlterUniqueTogether {
	pub fn new(name: impl Into<String>, unique_together: BTreeSet<Vec<String>>) -> Self {
		Self {
			name: name.into(),
			unique_together,
		}
	}

	pub fn name_lower(&self) -> String {
		self.name.to_lowercase()
	}
}

impl MigrationOperation for AlterUniqueTogether {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("alter_{}_unique_together", self.name_lower()))
	}

	fn describe(&self) -> String {
		format!(
			"Alter unique_together for {} ({} constraint(s))",
			self.name,
			self.unique_together.len()
		)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		state
			.model_mut(&ModelKey::new(app_label, &self.name))?
			.options
			.unique_together = self.unique_together.clone();
		Ok(())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterOrderWithRespectTo {
	pub name: String,
	pub order_with_respect_to: Option<String>,
}

impl AlterOrderWithRespectTo {
	pub fn new(name: impl Into<String>, order_with_respect_to: Option<String>) -> Self {
		Self {
			name: name.into(),
			order_with_respect_to,
		}
	}

	pub fn name_lower(&self) -> String {
		self.name.to_lowercase()
	}
}

impl MigrationOperation for AlterOrderWithRespectTo {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("alter_{}_order_with_respect_to", self.name_lower()))
	}

	fn describe(&self) -> String {
		format!("Set order_with_respect_to on {} to {:?}", self.name, self.order_with_respect_to)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		state
			.model_mut(&ModelKey::new(app_label, &self.name))?
			.options
			.order_with_respect_to = self.order_with_respect_to.clone();
		Ok(())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddIndex {
	pub model_name: String,
	pub index: IndexState,
}

impl AddIndex {
	pub fn new(model_name: impl Into<String>, index: IndexState) -> Self {
		Self {
			model_name: model_name.into(),
			index,
		}
	}
}

impl MigrationOperation for AddIndex {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!(
			"{}_{}",
			self.model_name.to_lowercase(),
			self.index.name.to_lowercase()
		))
	}

	fn describe(&self) -> String {
		format!(
			"Create index {} on field(s) {} of model {}",
			self.index.name,
			self.index.fields.join(", "),
			self.model_name
		)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		state
			.model_mut(&ModelKey::new(app_label, &self.model_name))?
			.options
			.indexes
			.push(self.index.clone());
		Ok(())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveIndex {
	pub model_name: String,
	pub name: String,
}

impl RemoveIndex {
	pub fn new(model_name: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			model_name: model_name.into(),
			name: name.into(),
		}
	}

	pub fn model_name_lower(&self) -> String {
		self.model_name.to_lowercase()
	}
}

impl MigrationOperation for RemoveIndex {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("remove_{}_{}", self.model_name_lower(), self.name.to_lowercase()))
	}

	fn describe(&self) -> String {
		format!("Remove index {} from {}", self.name, self.model_name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		let model = state.model_mut(&ModelKey::new(app_label, &self.model_name))?;
		model.options.indexes.retain(|index| index.name != self.name);
		Ok(())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameIndex {
	pub model_name: String,
	pub old_name: String,
	pub new_name: String,
}

impl RenameIndex {
	pub fn new(model_name: impl Into<String>, old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
		Self {
			model_name: model_name.into(),
			old_name: old_name.into(),
			new_name: new_name.into(),
		}
	}
}

impl MigrationOperation for RenameIndex {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!(
			"rename_{}_{}",
			self.old_name.to_lowercase(),
			self.new_name.to_lowercase()
		))
	}

	fn describe(&self) -> String {
		format!(
			"Rename index {} on {} to {}",
			self.old_name, self.model_name, self.new_name
		)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		let key = ModelKey::new(app_label, &self.model_name);
		let model = state.model_mut(&key)?;
		let index = model
			.options
			.indexes
			.iter_mut()
			.find(|index| index.name == self.old_name)
			.ok_or_else(|| MigrationError::UnresolvedReference {
				model: key.to_string(),
				reference: format!("index {:?}", self.old_name),
			})?;
		index.name = self.new_name.clone();
		Ok(())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddConstraint {
	pub model_name: String,
	pub constraint: ConstraintState,
}

impl AddConstraint {
	pub fn new(model_name: impl Into<String>, constraint: ConstraintState) -> Self {
		Self {
			model_name: model_name.into(),
			constraint,
		}
	}
}

impl MigrationOperation for AddConstraint {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!(
			"{}_{}",
			self.model_name.to_lowercase(),
			self.constraint.name.to_lowercase()
		))
	}

	fn describe(&self) -> String {
		format!(
			"Create constraint {} on model {}",
			self.constraint.name, self.model_name
		)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		state
			.model_mut(&ModelKey::new(app_label, &self.model_name))?
			.options
			.constraints
			.push(self.constraint.clone());
		Ok(())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveConstraint {
	pub model_name: String,
	pub name: String,
}

impl RemoveConstraint {
	pub fn new(model_name: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			model_name: model_name.into(),
			name: name.into(),
		}
	}

	pub fn model_name_lower(&self) -> String {
		self.model_name.to_lowercase()
	}
}

impl MigrationOperation for RemoveConstraint {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!("remove_{}_{}", self.model_name_lower(), self.name.to_lowercase()))
	}

	fn describe(&self) -> String {
		format!("Remove constraint {} from model {}", self.name, self.model_name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		let model = state.model_mut(&ModelKey::new(app_label, &self.model_name))?;
		model.options.constraints.retain(|c| c.name != self.name);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn library() -> ProjectState {
		ProjectState::from_iter([
			ModelState::new("library", "Author").with_field("id", FieldState::auto()),
			ModelState::new("library", "Book")
				.with_field("id", FieldState::auto())
				.with_field("author", FieldState::foreign_key(("library", "Author")))
				.with_index(IndexState::new("book_author_idx", ["author"])),
		])
	}

	#[rstest]
	fn test_rename_model_repoints_relations() {
		let mut state = library();

		RenameModel::new("Author", "Writer")
			.state_forwards("library", &mut state)
			.unwrap();

		assert!(state.get_model(&ModelKey::new("library", "author")).is_none());
		let book = state.get_model(&ModelKey::new("library", "book")).unwrap();
		let rel = book.fields["author"].relation().unwrap();
		assert_eq!(rel.to, ModelKey::new("library", "writer"));
	}

	#[rstest]
	fn test_delete_missing_model_is_an_error() {
		let mut state = library();

		let result = DeleteModel::new("Publisher").state_forwards("library", &mut state);

		assert!(matches!(result, Err(MigrationError::ModelNotFound(_))));
	}

	#[rstest]
	fn test_rename_index() {
		let mut state = library();

		RenameIndex::new("Book", "book_author_idx", "book_writer_idx")
			.state_forwards("library", &mut state)
			.unwrap();

		let book = state.get_model(&ModelKey::new("library", "book")).unwrap();
		assert_eq!(book.options.indexes[0].name, "book_writer_idx");
	}

	#[rstest]
	#[case(Box::new(CreateModel::new("Author", vec![], ModelOptions::default())) as Box<dyn MigrationOperation>, "author")]
	#[case(Box::new(DeleteModel::new("Author")), "delete_author")]
	#[case(Box::new(RenameModel::new("Author", "Writer")), "rename_author_writer")]
	#[case(Box::new(AlterModelTable::new("Author", None)), "alter_author_table")]
	#[case(Box::new(AlterUniqueTogether::new("Book", BTreeSet::new())), "alter_book_unique_together")]
	#[case(Box::new(AddIndex::new("Book", IndexState::new("Book_Title_Idx", ["title"]))), "book_book_title_idx")]
	#[case(Box::new(RemoveConstraint::new("Book", "uniq")), "remove_book_uniq")]
	fn test_name_fragments(#[case] operation: Box<dyn MigrationOperation>, #[case] expected: &str) {
		assert_eq!(operation.migration_name_fragment().as_deref(), Some(expected));
	}
}
