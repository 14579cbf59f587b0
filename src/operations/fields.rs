//! Field-level operations

use super::MigrationOperation;
use crate::state::{FieldDefault, FieldState, ModelKey, ProjectState};
use crate::{MigrationError, Result};
use serde::{Deserialize, Serialize};

/// Field as stored in the state after the operation: a one-off default
/// used only to fill existing rows is dropped.
fn stored_field(field: &FieldState, preserve_default: bool) -> FieldState {
	let mut field = field.clone();
	if !preserve_default {
		field.default = FieldDefault::NotProvided;
	}
	field
}

/// Add a field to a model
///
/// # Example
///
/// ```rust
/// use reinhardt_autodetector::{AddField, FieldState, MigrationOperation, ModelKey, ModelState, ProjectState, Value};
///
/// let mut state = ProjectState::from_iter([
/// 	ModelState::new("blog", "Post").with_field("id", FieldState::auto()),
/// ]);
/// let add = AddField::new("Post", "views", FieldState::integer().default(Value::Int(0)))
/// 	.with_preserve_default(false);
/// add.state_forwards("blog", &mut state).unwrap();
///
/// let post = state.get_model(&ModelKey::new("blog", "post")).unwrap();
/// assert!(!post.fields["views"].has_default());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddField {
	pub model_name: String,
	pub name: String,
	pub field: FieldState,
	/// `false` when the default only backfills existing rows.
	pub preserve_default: bool,
}

impl AddField {
	/// Create a new AddField operation
	pub fn new(model_name: impl Into<String>, name: impl Into<String>, field: FieldState) -> Self {
		Self {
			model_name: model_name.into(),
			name: name.into(),
			field,
			preserve_default: true,
		}
	}

	/// Set whether to preserve the default value after adding
	pub fn with_preserve_default(mut self, preserve: bool) -> Self {
		self.preserve_default = preserve;
		self
	}

	pub fn model_name_lower(&self) -> String {
		self.model_name.to_lowercase()
	}
}

impl MigrationOperation for AddField {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!(
			"{}_{}",
			self.model_name_lower(),
			self.name.to_lowercase()
		))
	}

	fn describe(&self) -> String {
		format!("Add field {} to {}", self.name, self.model_name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		let model = state.model_mut(&ModelKey::new(app_label, &self.model_name))?;
		model
			.fields
			.insert(self.name.clone(), stored_field(&self.field, self.preserve_default));
		Ok(())
	}
}

/// Remove a field from a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveField {
	pub model_name: String,
	pub name: String,
}

impl RemoveField {
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

impl MigrationOperation for RemoveField {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!(
			"remove_{}_{}",
			self.model_name_lower(),
			self.name.to_lowercase()
		))
	}

	fn describe(&self) -> String {
		format!("Remove field {} from {}", self.name, self.model_name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		let key = ModelKey::new(app_label, &self.model_name);
		let model = state.model_mut(&key)?;
		model
			.fields
			.shift_remove(&self.name)
			.map(|_| ())
			.ok_or_else(|| MigrationError::UnresolvedReference {
				model: key.to_string(),
				reference: format!("field {:?}", self.name),
			})
	}
}

/// Change the definition of a field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlterField {
	pub model_name: String,
	pub name: String,
	pub field: FieldState,
	pub preserve_default: bool,
}

impl AlterField {
	pub fn new(model_name: impl Into<String>, name: impl Into<String>, field: FieldState) -> Self {
		Self {
			model_name: model_name.into(),
			name: name.into(),
			field,
			preserve_default: true,
		}
	}

	pub fn with_preserve_default(mut self, preserve: bool) -> Self {
		self.preserve_default = preserve;
		self
	}

	pub fn model_name_lower(&self) -> String {
		self.model_name.to_lowercase()
	}
}

impl MigrationOperation for AlterField {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!(
			"alter_{}_{}",
			self.model_name_lower(),
			self.name.to_lowercase()
		))
	}

	fn describe(&self) -> String {
		format!("Alter field {} on {}", self.name, self.model_name)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		let key = ModelKey::new(app_label, &self.model_name);
		let model = state.model_mut(&key)?;
		let slot = model
			.fields
			.get_mut(&self.name)
			.ok_or_else(|| MigrationError::UnresolvedReference {
				model: key.to_string(),
				reference: format!("field {:?}", self.name),
			})?;
		*slot = stored_field(&self.field, self.preserve_default);
		Ok(())
	}
}

/// Rename a field, rewriting options and `to_field` references that use it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameField {
	pub model_name: String,
	pub old_name: String,
	pub new_name: String,
}

impl RenameField {
	pub fn new(
		model_name: impl Into<String>,
		old_name: impl Into<String>,
		new_name: impl Into<String>,
	) -> Self {
		Self {
			model_name: model_name.into(),
			old_name: old_name.into(),
			new_name: new_name.into(),
		}
	}

	pub fn model_name_lower(&self) -> String {
		self.model_name.to_lowercase()
	}
}

impl MigrationOperation for RenameField {
	fn migration_name_fragment(&self) -> Option<String> {
		Some(format!(
			"rename_{}_{}_{}",
			self.old_name.to_lowercase(),
			self.model_name_lower(),
			self.new_name.to_lowercase()
		))
	}

	fn describe(&self) -> String {
		format!(
			"Rename field {} on {} to {}",
			self.old_name, self.model_name, self.new_name
		)
	}

	fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
		let key = ModelKey::new(app_label, &self.model_name);
		state
			.model_mut(&key)?
			.rename_field(&self.old_name, &self.new_name)?;
		state.repoint_to_field(&key, &self.old_name, &self.new_name);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::deconstruct::Value;
	use crate::state::ModelState;
	use rstest::{fixture, rstest};

	#[fixture]
	fn state() -> ProjectState {
		ProjectState::from_iter([
			ModelState::new("shop", "Product")
				.with_field("id", FieldState::auto())
				.with_field("sku", FieldState::char(20).unique())
				.with_field("price", FieldState::integer()),
			ModelState::new("shop", "OrderLine")
				.with_field("id", FieldState::auto())
				.with_field(
					"product",
					FieldState::foreign_key(("shop", "Product")).to_field("sku"),
				),
		])
	}

	#[rstest]
	fn test_alter_field_keeps_position(mut state: ProjectState) {
		AlterField::new("Product", "sku", FieldState::char(40).unique())
			.state_forwards("shop", &mut state)
			.unwrap();

		let product = state.get_model(&ModelKey::new("shop", "product")).unwrap();
		assert_eq!(product.fields.get_index_of("sku"), Some(1));
		assert_eq!(product.fields["sku"], FieldState::char(40).unique());
	}

	#[rstest]
	fn test_alter_field_without_preserving_default(mut state: ProjectState) {
		AlterField::new("Product", "price", FieldState::integer().default(Value::Int(0)))
			.with_preserve_default(false)
			.state_forwards("shop", &mut state)
			.unwrap();

		let product = state.get_model(&ModelKey::new("shop", "product")).unwrap();
		assert_eq!(product.fields["price"], FieldState::integer());
	}

	#[rstest]
	fn test_rename_field_repoints_to_field(mut state: ProjectState) {
		RenameField::new("Product", "sku", "code")
			.state_forwards("shop", &mut state)
			.unwrap();

		let line = state.get_model(&ModelKey::new("shop", "orderline")).unwrap();
		let rel = line.fields["product"].relation().unwrap();
		assert_eq!(rel.to_field.as_deref(), Some("code"));
	}

	#[rstest]
	fn test_remove_missing_field_names_it(mut state: ProjectState) {
		let err = RemoveField::new("Product", "colour")
			.state_forwards("shop", &mut state)
			.unwrap_err();

		assert!(err.to_string().contains("colour"), "{err}");
	}

	#[rstest]
	fn test_rename_field_fragment() {
		let op = RenameField::new("Author", "name", "full_name");

		assert_eq!(
			op.migration_name_fragment().as_deref(),
			Some("rename_name_author_full_name")
		);
	}
}
