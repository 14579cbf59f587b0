//! Project state: declarative snapshots of every model
//!
//! The autodetector reads two [`ProjectState`]s. The same types are mutated by
//! [`crate::operations::MigrationOperation::state_forwards`] when a migration
//! is replayed onto a state.

mod fields;
mod options;

pub use fields::{FieldDefault, FieldKind, FieldState, GeneratedSpec, Relation};
pub use options::{
	ALTER_OPTION_KEYS, ConstraintKind, ConstraintState, IndexState, ManagerState, ModelBase,
	ModelOptions, ORDER_COLUMN, normalize_together,
};

use crate::migration::Migration;
use crate::operations::{MigrationOperation, Operation};
use crate::swappable::SwappableSettings;
use crate::{MigrationError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// `(app_label, model_name)` with the model name lowercased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelKey {
	pub app_label: String,
	pub model_name: String,
}

impl ModelKey {
	pub fn new(app_label: impl Into<String>, model_name: impl AsRef<str>) -> Self {
		Self {
			app_label: app_label.into(),
			model_name: model_name.as_ref().to_lowercase(),
		}
	}

	/// Parse an `"app_label.ModelName"` reference.
	///
	/// # Example
	///
	/// ```rust
	/// use reinhardt_autodetector::ModelKey;
	///
	/// let key = ModelKey::parse("accounts.User").unwrap();
	/// assert_eq!(key, ModelKey::new("accounts", "user"));
	/// assert!(ModelKey::parse("User").is_err());
	/// ```
	pub fn parse(reference: &str) -> Result<Self> {
		match reference.split_once('.') {
			Some((app, model)) if !app.is_empty() && !model.is_empty() => Ok(Self::new(app, model)),
			_ => Err(MigrationError::InvalidState(format!(
				"model reference {reference:?} must be of the form \"app_label.ModelName\""
			))),
		}
	}
}

impl fmt::Display for ModelKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.app_label, self.model_name)
	}
}

impl From<(&str, &str)> for ModelKey {
	fn from((app_label, model_name): (&str, &str)) -> Self {
		Self::new(app_label, model_name)
	}
}

impl From<&ModelKey> for ModelKey {
	fn from(key: &ModelKey) -> Self {
		key.clone()
	}
}

/// One model declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
	pub app_label: String,
	/// Declared name, original case.
	pub name: String,
	/// Declaration order is kept; it is not significant for equality.
	pub fields: IndexMap<String, FieldState>,
	pub options: ModelOptions,
	pub bases: Vec<ModelBase>,
	pub managers: Vec<(String, ManagerState)>,
}

impl ModelState {
	pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			app_label: app_label.into(),
			name: name.into(),
			fields: IndexMap::new(),
			options: ModelOptions::default(),
			bases: vec![ModelBase::default()],
			managers: Vec::new(),
		}
	}

	pub fn with_field(mut self, name: impl Into<String>, field: FieldState) -> Self {
		self.fields.insert(name.into(), field);
		self
	}

	pub fn with_options(mut self, options: ModelOptions) -> Self {
		self.options = options;
		self
	}

	pub fn with_unique_together<I, F>(mut self, groups: I) -> Self
	where
		I: IntoIterator<Item = F>,
		F: IntoIterator,
		F::Item: Into<String>,
	{
		self.options.unique_together = groups
			.into_iter()
			.map(|group| group.into_iter().map(Into::into).collect())
			.collect();
		self
	}

	pub fn with_index(mut self, index: IndexState) -> Self {
		self.options.indexes.push(index);
		self
	}

	pub fn with_constraint(mut self, constraint: ConstraintState) -> Self {
		self.options.constraints.push(constraint);
		self
	}

	pub fn with_order_with_respect_to(mut self, field: impl Into<String>) -> Self {
		self.options.order_with_respect_to = Some(field.into());
		self
	}

	/// Replace the default `models.Model` base with a model base.
	pub fn with_base(mut self, base: impl Into<ModelKey>) -> Self {
		self.bases.retain(|b| *b != ModelBase::default());
		self.bases.push(ModelBase::Model(base.into()));
		self
	}

	pub fn with_manager(mut self, name: impl Into<String>, manager: ManagerState) -> Self {
		self.managers.push((name.into(), manager));
		self
	}

	pub fn proxy(mut self) -> Self {
		self.options.proxy = true;
		self
	}

	pub fn unmanaged(mut self) -> Self {
		self.options.managed = false;
		self
	}

	pub fn key(&self) -> ModelKey {
		ModelKey::new(self.app_label.clone(), &self.name)
	}

	pub fn name_lower(&self) -> String {
		self.name.to_lowercase()
	}

	pub fn get_field(&self, name: &str) -> Result<&FieldState> {
		self.fields
			.get(name)
			.ok_or_else(|| MigrationError::UnresolvedReference {
				model: self.key().to_string(),
				reference: format!("field {name:?}"),
			})
	}

	/// Model bases, skipping external mixins.
	pub fn model_bases(&self) -> impl Iterator<Item = &ModelKey> {
		self.bases.iter().filter_map(|base| match base {
			ModelBase::Model(key) => Some(key),
			ModelBase::External(_) => None,
		})
	}

	/// Rename a field in place, keeping its position, and rewrite every
	/// option of this model that mentions it.
	pub fn rename_field(&mut self, old: &str, new: &str) -> Result<()> {
		if !self.fields.contains_key(old) {
			return Err(MigrationError::UnresolvedReference {
				model: self.key().to_string(),
				reference: format!("field {old:?}"),
			});
		}
		self.fields = std::mem::take(&mut self.fields)
			.into_iter()
			.map(|(name, field)| if name == old { (new.to_string(), field) } else { (name, field) })
			.collect();
		self.options.rename_field(old, new);
		Ok(())
	}

	/// Same name, fields (by membership and structural equality), options,
	/// bases and managers. Field order is ignored.
	pub fn is_equivalent(&self, other: &Self) -> bool {
		self.app_label == other.app_label
			&& self.name_lower() == other.name_lower()
			&& self.fields.len() == other.fields.len()
			&& self
				.fields
				.iter()
				.all(|(name, field)| other.fields.get(name) == Some(field))
			&& self.options.is_equivalent(&other.options)
			&& self.bases == other.bases
			&& self.managers == other.managers
	}
}

/// Snapshot of all models, keyed by [`ModelKey`].
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
	models: BTreeMap<ModelKey, ModelState>,
	/// Applications that are not subject to detection.
	pub real_apps: BTreeSet<String>,
}

impl ProjectState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_real_apps(mut self, apps: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.real_apps.extend(apps.into_iter().map(Into::into));
		self
	}

	pub fn add_model(&mut self, model: ModelState) {
		self.models.insert(model.key(), model);
	}

	pub fn remove_model(&mut self, key: &ModelKey) -> Option<ModelState> {
		self.models.remove(key)
	}

	pub fn get_model(&self, key: &ModelKey) -> Option<&ModelState> {
		self.models.get(key)
	}

	pub fn get_model_mut(&mut self, key: &ModelKey) -> Option<&mut ModelState> {
		self.models.get_mut(key)
	}

	/// Look up a model that must exist.
	pub fn model(&self, key: &ModelKey) -> Result<&ModelState> {
		self.models
			.get(key)
			.ok_or_else(|| MigrationError::ModelNotFound(key.to_string()))
	}

	pub(crate) fn model_mut(&mut self, key: &ModelKey) -> Result<&mut ModelState> {
		self.models
			.get_mut(key)
			.ok_or_else(|| MigrationError::ModelNotFound(key.to_string()))
	}

	pub fn contains(&self, key: &ModelKey) -> bool {
		self.models.contains_key(key)
	}

	pub fn models(&self) -> impl Iterator<Item = (&ModelKey, &ModelState)> {
		self.models.iter()
	}

	pub fn len(&self) -> usize {
		self.models.len()
	}

	pub fn is_empty(&self) -> bool {
		self.models.is_empty()
	}

	/// Applications that have at least one model.
	pub fn apps(&self) -> BTreeSet<String> {
		self.models.keys().map(|k| k.app_label.clone()).collect()
	}

	/// Follow proxy bases down to the model that owns the table.
	pub fn concrete_key(&self, key: &ModelKey) -> ModelKey {
		let mut current = key.clone();
		for _ in 0..=self.models.len() {
			let Some(model) = self.models.get(&current) else {
				break;
			};
			if !model.options.proxy {
				break;
			}
			match model.model_bases().next() {
				Some(base) => current = base.clone(),
				None => break,
			}
		}
		current
	}

	/// Every relation field pointing at `key` (as target or through model),
	/// returned as `(owner, field name, field)`.
	pub fn relations_to(&self, key: &ModelKey) -> Vec<(ModelKey, String, FieldState)> {
		let concrete = self.concrete_key(key);
		let mut found = Vec::new();
		for (owner, model) in &self.models {
			for (name, field) in &model.fields {
				let Some(rel) = field.relation() else {
					continue;
				};
				let points_here = self.concrete_key(&rel.to) == concrete
					|| rel.through.as_ref().is_some_and(|t| *t == *key);
				if points_here {
					found.push((owner.clone(), name.clone(), field.clone()));
				}
			}
		}
		found
	}

	/// Check that every model, field and option reference resolves within
	/// this state.
	pub fn validate(&self, settings: &SwappableSettings) -> Result<()> {
		for (key, model) in &self.models {
			let mut problems = Vec::new();
			for (name, field) in &model.fields {
				if let Some(rel) = field.relation() {
					let target = settings.resolve_relation(rel);
					match self.models.get(&target) {
						None => problems.push(format!(
							"field {name:?} points to unknown model {target}"
						)),
						Some(target_model) => {
							if let Some(to_field) = &rel.to_field {
								if !target_model.fields.contains_key(to_field) {
									problems.push(format!(
										"field {name:?} points to unknown field {target}.{to_field}"
									));
								}
							}
						}
					}
					if let Some(through) = &rel.through {
						if !self.models.contains_key(through) {
							problems.push(format!("field {name:?} uses unknown through model {through}"));
						}
					}
				}
				if let Some(generated) = field.as_generated() {
					let missing: Vec<&str> = generated
						.references
						.iter()
						.map(String::as_str)
						.filter(|r| !model.fields.contains_key(*r))
						.collect();
					if !missing.is_empty() {
						problems.push(format!(
							"generated field {name:?} reads unknown fields {missing:?}"
						));
					}
				}
			}
			let unknown: Vec<&str> = model
				.options
				.referenced_fields()
				.into_iter()
				.filter(|referenced| {
					let implicit_order = *referenced == ORDER_COLUMN
						&& model.options.order_with_respect_to.is_some();
					!implicit_order && !model.fields.contains_key(*referenced)
				})
				.collect();
			if !unknown.is_empty() {
				problems.push(format!("options name unknown fields {unknown:?}"));
			}
			for base in model.model_bases() {
				if !self.models.contains_key(base) {
					problems.push(format!("unknown base model {base}"));
				}
			}
			if !problems.is_empty() {
				return Err(MigrationError::UnresolvedReference {
					model: key.to_string(),
					reference: problems.join("; "),
				});
			}
		}
		Ok(())
	}

	/// Replay one operation belonging to `app_label`.
	pub fn apply(&mut self, app_label: &str, operation: &Operation) -> Result<()> {
		operation.state_forwards(app_label, self)
	}

	/// Replay every operation of a migration in order.
	pub fn apply_migration(&mut self, migration: &Migration) -> Result<()> {
		for operation in &migration.operations {
			self.apply(&migration.app_label, operation)?;
		}
		Ok(())
	}

	/// Point every relation that targets `old` at `new`.
	pub(crate) fn repoint_relations(&mut self, old: &ModelKey, new: &ModelKey) {
		for model in self.models.values_mut() {
			for field in model.fields.values_mut() {
				if let Some(rel) = field.relation_mut() {
					if rel.to == *old {
						rel.to = new.clone();
					}
					if rel.through.as_ref() == Some(old) {
						rel.through = Some(new.clone());
					}
				}
			}
			for base in &mut model.bases {
				if *base == ModelBase::Model(old.clone()) {
					*base = ModelBase::Model(new.clone());
				}
			}
		}
	}

	/// Rewrite `to_field` references after a field rename on `key`.
	pub(crate) fn repoint_to_field(&mut self, key: &ModelKey, old: &str, new: &str) {
		for model in self.models.values_mut() {
			for field in model.fields.values_mut() {
				if let Some(rel) = field.relation_mut() {
					if rel.to == *key && rel.to_field.as_deref() == Some(old) {
						rel.to_field = Some(new.to_string());
					}
				}
			}
		}
	}

	/// Same models, each equivalent per [`ModelState::is_equivalent`].
	pub fn is_equivalent(&self, other: &Self) -> bool {
		self.models.len() == other.models.len()
			&& self.models.iter().all(|(key, model)| {
				other
					.models
					.get(key)
					.is_some_and(|theirs| model.is_equivalent(theirs))
			})
	}
}

impl FromIterator<ModelState> for ProjectState {
	fn from_iter<I: IntoIterator<Item = ModelState>>(iter: I) -> Self {
		let mut state = Self::new();
		for model in iter {
			state.add_model(model);
		}
		state
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn library() -> ProjectState {
		ProjectState::from_iter([
			ModelState::new("library", "Author")
				.with_field("id", FieldState::auto())
				.with_field("name", FieldState::char(100)),
			ModelState::new("library", "Book")
				.with_field("id", FieldState::auto())
				.with_field("author", FieldState::foreign_key(("library", "Author")))
				.with_field("title", FieldState::char(200))
				.with_unique_together([["author", "title"]]),
		])
	}

	#[rstest]
	fn test_model_key_lowercases_model_name() {
		assert_eq!(ModelKey::new("library", "BookShelf").model_name, "bookshelf");
		assert_eq!(ModelKey::new("library", "BookShelf").to_string(), "library.bookshelf");
	}

	#[rstest]
	fn test_relations_to_finds_incoming_foreign_keys() {
		let state = library();

		let relations = state.relations_to(&ModelKey::new("library", "author"));

		assert_eq!(relations.len(), 1);
		assert_eq!(relations[0].0, ModelKey::new("library", "book"));
		assert_eq!(relations[0].1, "author");
	}

	#[rstest]
	fn test_relations_to_proxy_resolve_to_concrete_model() {
		let mut state = library();
		state.add_model(
			ModelState::new("library", "FamousAuthor")
				.proxy()
				.with_base(("library", "Author")),
		);
		state.add_model(
			ModelState::new("library", "Award")
				.with_field("id", FieldState::auto())
				.with_field("winner", FieldState::foreign_key(("library", "FamousAuthor"))),
		);

		let relations = state.relations_to(&ModelKey::new("library", "author"));

		assert_eq!(relations.len(), 2);
	}

	#[rstest]
	fn test_validate_accepts_consistent_state() {
		assert!(library().validate(&SwappableSettings::new()).is_ok());
	}

	#[rstest]
	fn test_validate_rejects_unknown_relation_target() {
		let state = ProjectState::from_iter([ModelState::new("library", "Book")
			.with_field("id", FieldState::auto())
			.with_field("publisher", FieldState::foreign_key(("press", "Publisher")))]);

		let err = state.validate(&SwappableSettings::new()).unwrap_err();

		assert!(err.to_string().contains("press.publisher"), "{err}");
	}

	#[rstest]
	fn test_validate_rejects_unknown_field_in_unique_together() {
		let state = ProjectState::from_iter([ModelState::new("library", "Book")
			.with_field("id", FieldState::auto())
			.with_unique_together([["title", "isbn"]])]);

		let err = state.validate(&SwappableSettings::new()).unwrap_err();

		assert!(matches!(err, MigrationError::UnresolvedReference { .. }));
		assert!(err.to_string().contains("\"isbn\""), "{err}");
		assert!(err.to_string().contains("\"title\""), "{err}");
	}

	/// **Test Intent**: Every unresolved name of a model is reported in one
	/// error, not just the first one found.
	#[rstest]
	fn test_validate_reports_every_unresolved_name() {
		let state = ProjectState::from_iter([ModelState::new("library", "Book")
			.with_field("id", FieldState::auto())
			.with_field("author", FieldState::foreign_key(("library", "Author")))
			.with_index(IndexState::new("book_slug_idx", ["slug"]))]);

		let err = state.validate(&SwappableSettings::new()).unwrap_err();

		let message = err.to_string();
		assert!(message.contains("library.author"), "{message}");
		assert!(message.contains("\"slug\""), "{message}");
	}

	#[rstest]
	fn test_order_column_is_allowed_with_order_with_respect_to() {
		let mut state = library();
		let book = state.get_model_mut(&ModelKey::new("library", "book")).unwrap();
		book.options.order_with_respect_to = Some("author".to_string());
		book.options.indexes.push(IndexState::new("book_order_idx", ["_order"]));

		assert!(state.validate(&SwappableSettings::new()).is_ok());
	}

	#[rstest]
	fn test_rename_field_keeps_position_and_rewrites_options() {
		let mut state = library();
		let book = state.get_model_mut(&ModelKey::new("library", "book")).unwrap();

		book.rename_field("title", "headline").unwrap();

		let names: Vec<_> = book.fields.keys().cloned().collect();
		assert_eq!(names, ["id", "author", "headline"]);
		assert!(book.options.unique_together.contains(&vec!["author".to_string(), "headline".to_string()]));
	}

	#[rstest]
	fn test_equivalence_ignores_field_order() {
		let a = ModelState::new("library", "Author")
			.with_field("id", FieldState::auto())
			.with_field("name", FieldState::char(100));
		let b = ModelState::new("library", "author")
			.with_field("name", FieldState::char(100))
			.with_field("id", FieldState::auto());

		assert!(a.is_equivalent(&b));
	}
}
