//! Change detection between two project states
//!
//! [`MigrationAutodetector`] compares a `from_state` with a `to_state` and
//! emits the operations that turn one into the other. Detection runs in a
//! fixed sequence of phases (renames first, then model creation and
//! deletion, then field and option changes); every operation is tagged with
//! the edges the sequencer needs to order it and to split apps into
//! migrations.
//!
//! ```rust
//! use reinhardt_autodetector::prelude::*;
//!
//! let from_state: ProjectState = [ModelState::new("blog", "Post")
//! 	.with_field("id", FieldState::auto())
//! 	.with_field("title", FieldState::char(200))]
//! .into_iter()
//! .collect();
//! let to_state: ProjectState = [ModelState::new("blog", "Post")
//! 	.with_field("id", FieldState::auto())
//! 	.with_field("title", FieldState::char(400))]
//! .into_iter()
//! .collect();
//!
//! let changes = MigrationAutodetector::new(from_state, to_state, Box::new(NonInteractiveQuestioner::new()))
//! 	.detect()
//! 	.unwrap();
//!
//! assert_eq!(changes["blog"].len(), 1);
//! assert!(matches!(changes["blog"][0].operations[0], Operation::AlterField(_)));
//! ```

mod fields;
mod models;
mod options;

use crate::arrange::{arrange_for_graph, trim_to_apps};
use crate::dependency::{DependencyKind, DependencyTarget, OperationDependency, PendingOperation};
use crate::graph::MigrationGraph;
use crate::migration::Migration;
use crate::operations::Operation;
use crate::questioner::MigrationQuestioner;
use crate::sequencer::Sequencer;
use crate::state::{
	ConstraintState, FieldState, IndexState, ModelKey, ModelState, ORDER_COLUMN, ProjectState,
};
use crate::swappable::SwappableSettings;
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};

/// Generated migrations, keyed by app label.
pub type Changes = BTreeMap<String, Vec<Migration>>;

/// Post-processing applied by [`MigrationAutodetector::changes`].
#[derive(Debug, Clone, Default)]
pub struct ChangesOptions {
	/// Keep only these apps and the apps they depend on.
	pub trim_to_apps: Option<BTreeSet<String>>,
	/// Name every new migration `NNNN_<name>` instead of suggesting one.
	pub migration_name: Option<String>,
}

impl ChangesOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_trim_to_apps(mut self, apps: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.trim_to_apps = Some(apps.into_iter().map(Into::into).collect());
		self
	}

	pub fn with_migration_name(mut self, name: impl Into<String>) -> Self {
		self.migration_name = Some(name.into());
		self
	}
}

/// Detects the changes between two project states.
pub struct MigrationAutodetector {
	from_state: ProjectState,
	to_state: ProjectState,
	questioner: Box<dyn MigrationQuestioner>,
	swappable: SwappableSettings,
	/// Apps listed in `real_apps` whose models are nevertheless turned into
	/// migrations.
	convert_apps: BTreeSet<String>,
}

impl MigrationAutodetector {
	pub fn new(
		from_state: ProjectState,
		to_state: ProjectState,
		questioner: Box<dyn MigrationQuestioner>,
	) -> Self {
		Self {
			from_state,
			to_state,
			questioner,
			swappable: SwappableSettings::new(),
			convert_apps: BTreeSet::new(),
		}
	}

	pub fn with_swappable_settings(mut self, settings: SwappableSettings) -> Self {
		self.swappable = settings;
		self
	}

	pub fn with_convert_apps(mut self, apps: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.convert_apps = apps.into_iter().map(Into::into).collect();
		self
	}

	pub fn from_state(&self) -> &ProjectState {
		&self.from_state
	}

	pub fn to_state(&self) -> &ProjectState {
		&self.to_state
	}

	/// Detect changes without an existing migration graph.
	///
	/// Migrations keep their placeholder names (`auto_1`, `auto_2`, ...).
	///
	/// # Errors
	///
	/// Fails when `to_state` does not validate, when the questioner refuses
	/// to supply a required default, or when operations cannot be ordered.
	pub fn detect(&self) -> Result<Changes> {
		self.detect_with_graph(&MigrationGraph::new())
	}

	/// Detect changes and arrange them against `graph`: numbered names,
	/// dependencies on the current leaves, and optional trimming.
	pub fn changes(&self, graph: &MigrationGraph, options: &ChangesOptions) -> Result<Changes> {
		let changes = self.detect_with_graph(graph)?;
		let changes = arrange_for_graph(changes, graph, options.migration_name.as_deref());
		Ok(match &options.trim_to_apps {
			Some(apps) => trim_to_apps(changes, apps),
			None => changes,
		})
	}

	fn detect_with_graph(&self, graph: &MigrationGraph) -> Result<Changes> {
		self.to_state.validate(&self.swappable)?;

		let mut generation = Generation::new(self);
		generation.run()?;
		let operation_count: usize = generation.generated.values().map(Vec::len).sum();
		tracing::info!(operations = operation_count, "detected model changes");

		let existing_apps = self.from_state.apps();
		Sequencer::new(&self.swappable, graph, &existing_apps).sequence(generation.generated)
	}
}

/// A confirmed field rename, emitted after index and constraint removal.
#[derive(Debug, Clone)]
struct FieldRename {
	key: ModelKey,
	old_name: String,
	old_db_column: Option<String>,
	new_name: String,
}

#[derive(Debug, Clone, Default)]
struct AlteredIndexes {
	added: Vec<IndexState>,
	removed: Vec<IndexState>,
	/// `(old name, new name)`
	renamed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
struct AlteredConstraints {
	added: Vec<ConstraintState>,
	removed: Vec<ConstraintState>,
}

/// State of a single detection run.
///
/// Model keys held in the `old_*` sets use the *new* name of renamed
/// models once renames have been detected; `old_key` maps back.
struct Generation<'a> {
	from: &'a ProjectState,
	to: &'a ProjectState,
	questioner: &'a dyn MigrationQuestioner,
	swappable: &'a SwappableSettings,

	old_model_keys: BTreeSet<ModelKey>,
	old_proxy_keys: BTreeSet<ModelKey>,
	old_unmanaged_keys: BTreeSet<ModelKey>,
	new_model_keys: BTreeSet<ModelKey>,
	new_proxy_keys: BTreeSet<ModelKey>,
	new_unmanaged_keys: BTreeSet<ModelKey>,

	kept_model_keys: BTreeSet<ModelKey>,
	kept_proxy_keys: BTreeSet<ModelKey>,
	kept_unmanaged_keys: BTreeSet<ModelKey>,
	old_field_keys: BTreeSet<(ModelKey, String)>,
	new_field_keys: BTreeSet<(ModelKey, String)>,

	/// New key to old (lowercased) model name.
	renamed_models: BTreeMap<ModelKey, String>,
	/// Old key to new key.
	renamed_models_rel: BTreeMap<ModelKey, ModelKey>,
	/// `(model, new field name)` to old field name.
	renamed_fields: BTreeMap<(ModelKey, String), String>,
	renamed_operations: Vec<FieldRename>,

	altered_indexes: BTreeMap<ModelKey, AlteredIndexes>,
	altered_constraints: BTreeMap<ModelKey, AlteredConstraints>,

	generated: BTreeMap<String, Vec<PendingOperation>>,
	/// Insertion point of the next `CreateModel` per app.
	created_cursor: BTreeMap<String, usize>,
}

impl<'a> Generation<'a> {
	fn new(detector: &'a MigrationAutodetector) -> Self {
		let from = &detector.from_state;
		let to = &detector.to_state;
		let mut generation = Self {
			from,
			to,
			questioner: detector.questioner.as_ref(),
			swappable: &detector.swappable,
			old_model_keys: BTreeSet::new(),
			old_proxy_keys: BTreeSet::new(),
			old_unmanaged_keys: BTreeSet::new(),
			new_model_keys: BTreeSet::new(),
			new_proxy_keys: BTreeSet::new(),
			new_unmanaged_keys: BTreeSet::new(),
			kept_model_keys: BTreeSet::new(),
			kept_proxy_keys: BTreeSet::new(),
			kept_unmanaged_keys: BTreeSet::new(),
			old_field_keys: BTreeSet::new(),
			new_field_keys: BTreeSet::new(),
			renamed_models: BTreeMap::new(),
			renamed_models_rel: BTreeMap::new(),
			renamed_fields: BTreeMap::new(),
			renamed_operations: Vec::new(),
			altered_indexes: BTreeMap::new(),
			altered_constraints: BTreeMap::new(),
			generated: BTreeMap::new(),
			created_cursor: BTreeMap::new(),
		};

		for (key, model) in from.models() {
			if model.options.is_abstract {
				continue;
			}
			if !model.options.managed {
				generation.old_unmanaged_keys.insert(key.clone());
			} else if !from.real_apps.contains(&key.app_label) {
				if model.options.proxy {
					generation.old_proxy_keys.insert(key.clone());
				} else {
					generation.old_model_keys.insert(key.clone());
				}
			}
		}
		for (key, model) in to.models() {
			if model.options.is_abstract {
				continue;
			}
			if !model.options.managed {
				generation.new_unmanaged_keys.insert(key.clone());
			} else if !from.real_apps.contains(&key.app_label)
				|| detector.convert_apps.contains(&key.app_label)
			{
				if model.options.proxy {
					generation.new_proxy_keys.insert(key.clone());
				} else {
					generation.new_model_keys.insert(key.clone());
				}
			}
		}
		generation
	}

	fn run(&mut self) -> Result<()> {
		self.generate_renamed_models()?;
		self.prepare_field_lists()?;

		self.generate_deleted_models()?;
		self.generate_created_models()?;
		self.generate_deleted_proxies()?;
		self.generate_created_proxies()?;
		self.generate_altered_options()?;
		self.generate_altered_managers()?;
		self.generate_altered_db_table_comment()?;

		self.create_renamed_fields()?;
		self.create_altered_indexes()?;
		self.create_altered_constraints()?;
		self.generate_removed_constraints()?;
		self.generate_removed_indexes()?;
		self.generate_renamed_fields()?;
		self.generate_renamed_indexes()?;
		self.generate_removed_altered_unique_together()?;
		self.generate_removed_fields()?;
		self.generate_added_fields()?;
		self.generate_altered_fields()?;
		self.generate_altered_order_with_respect_to()?;
		self.generate_altered_unique_together()?;
		self.generate_added_indexes()?;
		self.generate_added_constraints()?;
		self.generate_altered_db_table()?;
		Ok(())
	}

	/// Split kept models out of the old/new key sets and list their fields.
	fn prepare_field_lists(&mut self) -> Result<()> {
		self.kept_model_keys = self
			.old_model_keys
			.intersection(&self.new_model_keys)
			.cloned()
			.collect();
		self.kept_proxy_keys = self
			.old_proxy_keys
			.intersection(&self.new_proxy_keys)
			.cloned()
			.collect();
		self.kept_unmanaged_keys = self
			.old_unmanaged_keys
			.intersection(&self.new_unmanaged_keys)
			.cloned()
			.collect();

		let mut old_field_keys = BTreeSet::new();
		let mut new_field_keys = BTreeSet::new();
		for key in &self.kept_model_keys {
			for name in self.old_model(key)?.fields.keys() {
				old_field_keys.insert((key.clone(), name.clone()));
			}
			for name in self.to.model(key)?.fields.keys() {
				new_field_keys.insert((key.clone(), name.clone()));
			}
		}
		self.old_field_keys = old_field_keys;
		self.new_field_keys = new_field_keys;
		Ok(())
	}

	fn add_operation(
		&mut self,
		app_label: &str,
		operation: impl Into<Operation>,
		dependencies: impl IntoIterator<Item = OperationDependency>,
	) {
		self.generated
			.entry(app_label.to_string())
			.or_default()
			.push(PendingOperation::new(operation).with_dependencies(dependencies));
	}

	/// Queue a model creation ahead of the app's other operations, after
	/// earlier creations.
	fn add_operation_front(
		&mut self,
		app_label: &str,
		operation: impl Into<Operation>,
		dependencies: impl IntoIterator<Item = OperationDependency>,
	) {
		let cursor = self.created_cursor.entry(app_label.to_string()).or_insert(0);
		let operations = self.generated.entry(app_label.to_string()).or_default();
		let at = (*cursor).min(operations.len());
		operations.insert(at, PendingOperation::new(operation).with_dependencies(dependencies));
		*cursor += 1;
	}

	/// Key a (possibly renamed) model had in the old state.
	fn old_key(&self, key: &ModelKey) -> ModelKey {
		match self.renamed_models.get(key) {
			Some(old_name) => ModelKey::new(key.app_label.clone(), old_name),
			None => key.clone(),
		}
	}

	/// Key an old model has in the new state.
	fn new_key(&self, old: &ModelKey) -> ModelKey {
		self.renamed_models_rel
			.get(old)
			.cloned()
			.unwrap_or_else(|| old.clone())
	}

	fn old_model(&self, key: &ModelKey) -> Result<&'a ModelState> {
		self.from.model(&self.old_key(key))
	}

	/// Name a field of `key` had in the old state.
	fn old_field_name(&self, key: &ModelKey, name: &str) -> String {
		self.renamed_fields
			.get(&(key.clone(), name.to_string()))
			.cloned()
			.unwrap_or_else(|| name.to_string())
	}

	/// Name an old field of `key` has in the new state.
	fn new_field_name(&self, key: &ModelKey, old_name: &str) -> String {
		self.renamed_fields
			.iter()
			.find(|((k, _), old)| k == key && old.as_str() == old_name)
			.map(|((_, new), _)| new.clone())
			.unwrap_or_else(|| old_name.to_string())
	}

	/// An old field with its relation moved through model and field renames,
	/// so that it compares equal to an unchanged new field.
	fn forward_field(&self, field: &FieldState) -> FieldState {
		let mut field = field.clone();
		if let Some(rel) = field.relation_mut() {
			let old_target = rel.to.clone();
			if let Some(new_target) = self.renamed_models_rel.get(&rel.to) {
				rel.to = new_target.clone();
			}
			if let Some(through) = rel.through.as_mut() {
				if let Some(new_through) = self.renamed_models_rel.get(through) {
					*through = new_through.clone();
				}
			}
			if let Some(to_field) = rel.to_field.as_mut() {
				let target = self.new_key(&old_target);
				*to_field = self.new_field_name(&target, to_field);
			}
		}
		field
	}
}

/// Edges for a relation field: creation of its target (through the
/// swappable setting when it has one) and of its explicit join model.
fn relation_dependencies(field: &FieldState) -> Vec<OperationDependency> {
	let Some(rel) = field.relation() else {
		return Vec::new();
	};
	let mut dependencies = vec![match &rel.swappable_setting {
		Some(setting) => OperationDependency::swappable(setting.clone(), &rel.to),
		None => OperationDependency::create_model(&rel.to),
	}];
	if let Some(through) = &rel.through {
		dependencies.push(OperationDependency::create_model(through));
	}
	dependencies
}

/// Relation edges of every field of a model.
fn model_dependencies(model: &ModelState) -> Vec<OperationDependency> {
	model.fields.values().flat_map(relation_dependencies).collect()
}

/// Edges for an option that names fields: each field must exist and be in
/// its final shape; `_order` needs `order_with_respect_to` to be set.
fn field_reference_dependencies<'n>(
	key: &ModelKey,
	names: impl IntoIterator<Item = &'n str>,
) -> Vec<OperationDependency> {
	let mut dependencies = Vec::new();
	for name in names {
		if name == ORDER_COLUMN {
			dependencies.push(OperationDependency::new(key, None, DependencyKind::SetOrderWrt));
		} else {
			dependencies.push(OperationDependency::create_field(key, name));
			dependencies.push(OperationDependency::alter_field(key, name));
		}
	}
	dependencies
}

fn targets_model(dependency: &OperationDependency, key: &ModelKey) -> bool {
	matches!(&dependency.target, DependencyTarget::Model(target) if target == key)
}
