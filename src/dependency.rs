//! Operation dependency types
//!
//! Every operation emitted by the autodetector carries a list of
//! [`OperationDependency`] edges describing what must already have happened
//! before it can run:
//! - creation of a model or field ([`DependencyKind::Create`])
//! - removal of a model or field ([`DependencyKind::Remove`])
//! - alteration of a field ([`DependencyKind::Alter`])
//! - option changes that release or introduce a field reference
//!
//! Edges name models, not operations. The sequencer resolves them against
//! the pending operations of each app.

use crate::graph::FIRST_MIGRATION;
use crate::operations::Operation;
use crate::state::ModelKey;
use crate::swappable::SwappableSettings;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
	/// The model (or the field) must exist.
	Create,
	/// The model (or the field) must be gone.
	Remove,
	/// The field must have been altered.
	Alter,
	/// `order_with_respect_to` must no longer name the field.
	RemoveOrderWrt,
	/// `unique_together` of the model must have been rewritten.
	AlterTogether,
	/// Indexes or constraints of the model must have been dropped.
	RemoveIndexOrConstraint,
	/// `order_with_respect_to` must have been set, creating the `_order` column.
	SetOrderWrt,
}

/// The model an edge points at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DependencyTarget {
	Model(ModelKey),
	/// A swappable model, resolved through settings at sequencing time.
	Setting { setting: String, fallback: ModelKey },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationDependency {
	pub target: DependencyTarget,
	pub field: Option<String>,
	pub kind: DependencyKind,
}

impl OperationDependency {
	pub fn new(target: &ModelKey, field: Option<&str>, kind: DependencyKind) -> Self {
		Self {
			target: DependencyTarget::Model(target.clone()),
			field: field.map(str::to_string),
			kind,
		}
	}

	pub fn create_model(target: &ModelKey) -> Self {
		Self::new(target, None, DependencyKind::Create)
	}

	pub fn create_field(target: &ModelKey, field: &str) -> Self {
		Self::new(target, Some(field), DependencyKind::Create)
	}

	pub fn remove_model(target: &ModelKey) -> Self {
		Self::new(target, None, DependencyKind::Remove)
	}

	pub fn remove_field(target: &ModelKey, field: &str) -> Self {
		Self::new(target, Some(field), DependencyKind::Remove)
	}

	pub fn alter_field(target: &ModelKey, field: &str) -> Self {
		Self::new(target, Some(field), DependencyKind::Alter)
	}

	/// Creation of the model selected by `setting`.
	pub fn swappable(setting: impl Into<String>, fallback: &ModelKey) -> Self {
		Self {
			target: DependencyTarget::Setting {
				setting: setting.into(),
				fallback: fallback.clone(),
			},
			field: None,
			kind: DependencyKind::Create,
		}
	}

	/// Resolve swappable targets to concrete model keys.
	pub fn resolve(&self, settings: &SwappableSettings) -> ResolvedDependency {
		let (key, setting) = match &self.target {
			DependencyTarget::Model(key) => (key.clone(), None),
			DependencyTarget::Setting { setting, fallback } => (
				settings.resolve(setting).unwrap_or_else(|| fallback.clone()),
				Some(setting.clone()),
			),
		};
		ResolvedDependency {
			key,
			field: self.field.clone(),
			kind: self.kind,
			setting,
		}
	}
}

impl fmt::Display for OperationDependency {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.target {
			DependencyTarget::Model(key) => write!(f, "{key}")?,
			DependencyTarget::Setting { setting, .. } => write!(f, "__setting__.{setting}")?,
		}
		if let Some(field) = &self.field {
			write!(f, ".{field}")?;
		}
		write!(f, " ({:?})", self.kind)
	}
}

/// A dependency whose target has been resolved to a concrete model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
	pub key: ModelKey,
	pub field: Option<String>,
	pub kind: DependencyKind,
	/// The swappable setting the target came from.
	pub setting: Option<String>,
}

impl ResolvedDependency {
	/// Whether `operation`, belonging to `self.key.app_label`, is the
	/// operation this edge waits for.
	pub fn is_satisfied_by(&self, operation: &Operation) -> bool {
		let model = self.key.model_name.as_str();
		let field = self.field.as_deref();
		match (self.kind, operation) {
			(DependencyKind::Create, Operation::CreateModel(op)) => {
				op.name_lower() == model
					&& field.is_none_or(|f| op.fields.iter().any(|(name, _)| name == f))
			}
			(DependencyKind::Create, Operation::AddField(op)) => {
				op.model_name_lower() == model && field == Some(op.name.as_str())
			}
			(DependencyKind::Create, Operation::RenameField(op)) => {
				op.model_name_lower() == model && field == Some(op.new_name.as_str())
			}
			(DependencyKind::Remove, Operation::RemoveField(op)) => {
				op.model_name_lower() == model && field == Some(op.name.as_str())
			}
			(DependencyKind::Remove, Operation::DeleteModel(op)) => {
				field.is_none() && op.name_lower() == model
			}
			(DependencyKind::Alter, Operation::AlterField(op)) => {
				op.model_name_lower() == model && field == Some(op.name.as_str())
			}
			(DependencyKind::RemoveOrderWrt, Operation::AlterOrderWithRespectTo(op)) => {
				op.name_lower() == model && op.order_with_respect_to.as_deref() != field
			}
			(DependencyKind::SetOrderWrt, Operation::AlterOrderWithRespectTo(op)) => {
				op.name_lower() == model && op.order_with_respect_to.is_some()
			}
			(DependencyKind::AlterTogether, Operation::AlterUniqueTogether(op)) => {
				op.name_lower() == model
			}
			(DependencyKind::RemoveIndexOrConstraint, Operation::RemoveIndex(op)) => {
				op.model_name_lower() == model
			}
			(DependencyKind::RemoveIndexOrConstraint, Operation::RemoveConstraint(op)) => {
				op.model_name_lower() == model
			}
			_ => false,
		}
	}
}

/// An operation together with the edges it was annotated with.
#[derive(Debug, Clone)]
pub struct PendingOperation {
	pub operation: Operation,
	pub dependencies: Vec<OperationDependency>,
}

impl PendingOperation {
	pub fn new(operation: impl Into<Operation>) -> Self {
		Self {
			operation: operation.into(),
			dependencies: Vec::new(),
		}
	}

	/// Attach edges, dropping duplicates while keeping first-seen order.
	pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = OperationDependency>) -> Self {
		for dep in dependencies {
			if !self.dependencies.contains(&dep) {
				self.dependencies.push(dep);
			}
		}
		self
	}
}

/// A migration dependency on whatever app a swappable setting selects.
///
/// # Example
///
/// ```rust
/// use reinhardt_autodetector::SwappableDependency;
///
/// let dep = SwappableDependency::new("AUTH_USER_MODEL", "accounts");
/// assert_eq!(dep.resolve(), ("accounts".to_string(), "__first__".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwappableDependency {
	/// Setting key to look up (e.g., "AUTH_USER_MODEL")
	pub setting_key: String,

	/// App label the setting resolved to when the migration was generated
	pub app_label: String,
}

impl SwappableDependency {
	pub fn new(setting_key: impl Into<String>, app_label: impl Into<String>) -> Self {
		Self {
			setting_key: setting_key.into(),
			app_label: app_label.into(),
		}
	}

	/// Resolve to a dependency tuple (app_label, migration_name).
	pub fn resolve(&self) -> (String, String) {
		(self.app_label.clone(), FIRST_MIGRATION.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::operations::{
		AddField, AlterOrderWithRespectTo, CreateModel, DeleteModel, RemoveField, RenameField,
	};
	use crate::state::{FieldState, ModelOptions};
	use rstest::rstest;

	fn key(model: &str) -> ModelKey {
		ModelKey::new("library", model)
	}

	fn create_book() -> Operation {
		CreateModel::new(
			"Book",
			vec![
				("id".to_string(), FieldState::auto()),
				("title".to_string(), FieldState::char(200)),
			],
			ModelOptions::default(),
		)
		.into()
	}

	#[rstest]
	#[case(OperationDependency::create_model(&key("book")), create_book(), true)]
	#[case(OperationDependency::create_field(&key("book"), "title"), create_book(), true)]
	#[case(OperationDependency::create_field(&key("book"), "isbn"), create_book(), false)]
	#[case(
		OperationDependency::create_field(&key("book"), "isbn"),
		AddField::new("Book", "isbn", FieldState::char(13)).into(),
		true
	)]
	#[case(
		OperationDependency::create_field(&key("book"), "isbn"),
		RenameField::new("Book", "code", "isbn").into(),
		true
	)]
	#[case(
		OperationDependency::remove_field(&key("book"), "isbn"),
		RemoveField::new("Book", "isbn").into(),
		true
	)]
	#[case(OperationDependency::remove_model(&key("book")), DeleteModel::new("Book").into(), true)]
	#[case(
		OperationDependency::remove_model(&key("book")),
		RemoveField::new("Book", "isbn").into(),
		false
	)]
	#[case(
		OperationDependency::new(&key("book"), Some("author"), DependencyKind::RemoveOrderWrt),
		AlterOrderWithRespectTo::new("Book", None).into(),
		true
	)]
	#[case(
		OperationDependency::new(&key("book"), Some("author"), DependencyKind::RemoveOrderWrt),
		AlterOrderWithRespectTo::new("Book", Some("author".to_string())).into(),
		false
	)]
	fn test_dependency_matching(
		#[case] dependency: OperationDependency,
		#[case] operation: Operation,
		#[case] expected: bool,
	) {
		let resolved = dependency.resolve(&SwappableSettings::new());

		assert_eq!(resolved.is_satisfied_by(&operation), expected, "{dependency} vs {operation:?}");
	}

	#[rstest]
	fn test_swappable_dependency_resolves_through_settings() {
		let settings = SwappableSettings::new().with_setting("AUTH_USER_MODEL", "accounts.Member");
		let dep = OperationDependency::swappable("AUTH_USER_MODEL", &ModelKey::new("auth", "user"));

		let resolved = dep.resolve(&settings);

		assert_eq!(resolved.key, ModelKey::new("accounts", "member"));
		assert_eq!(resolved.setting.as_deref(), Some("AUTH_USER_MODEL"));
	}

	#[rstest]
	fn test_pending_operation_deduplicates_edges() {
		let pending = PendingOperation::new(DeleteModel::new("Book")).with_dependencies([
			OperationDependency::remove_field(&key("review"), "book"),
			OperationDependency::remove_field(&key("review"), "book"),
		]);

		assert_eq!(pending.dependencies.len(), 1);
	}
}
