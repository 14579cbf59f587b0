//! Shared helpers for the autodetector integration tests
#![allow(dead_code)]

use reinhardt_autodetector::{
	Changes, Migration, MigrationAutodetector, MigrationGraph, MigrationKey,
	MigrationQuestioner, ModelState, NonInteractiveQuestioner, ProjectState, Result,
};
use std::collections::BTreeSet;

/// Build a project state from a list of models.
pub fn state(models: impl IntoIterator<Item = ModelState>) -> ProjectState {
	models.into_iter().collect()
}

/// Detect with a non-interactive questioner against an empty graph.
pub fn detect(from: &ProjectState, to: &ProjectState) -> Result<Changes> {
	detect_with(from, to, Box::new(NonInteractiveQuestioner::new()))
}

pub fn detect_with(
	from: &ProjectState,
	to: &ProjectState,
	questioner: Box<dyn MigrationQuestioner>,
) -> Result<Changes> {
	MigrationAutodetector::new(from.clone(), to.clone(), questioner).detect()
}

/// Operation kinds of a migration, in order.
pub fn kinds(migration: &Migration) -> Vec<&'static str> {
	migration.operations.iter().map(|op| op.kind()).collect()
}

/// Every migration of `changes`, flattened.
pub fn all_migrations(changes: &Changes) -> Vec<&Migration> {
	changes.values().flatten().collect()
}

/// Replay `changes` onto `state` in dependency order.
///
/// Dependencies that name no generated migration (placeholders, migrations
/// already on disk) count as satisfied.
pub fn apply_changes(state: &ProjectState, changes: &Changes) -> ProjectState {
	let mut state = state.clone();
	let generated: BTreeSet<MigrationKey> = all_migrations(changes).iter().map(|m| m.key()).collect();
	let mut applied: BTreeSet<MigrationKey> = BTreeSet::new();

	while applied.len() < generated.len() {
		let next = all_migrations(changes).into_iter().find(|migration| {
			!applied.contains(&migration.key())
				&& migration
					.dependencies
					.iter()
					.all(|dep| applied.contains(dep) || !generated.contains(dep))
				&& preceding_in_app(changes, migration).all(|key| applied.contains(&key))
		});
		let migration = next.unwrap_or_else(|| panic!("no applicable migration left in {changes:#?}"));
		state
			.apply_migration(migration)
			.unwrap_or_else(|e| panic!("{} failed to apply: {e}", migration.id()));
		applied.insert(migration.key());
	}
	state
}

fn preceding_in_app<'a>(
	changes: &'a Changes,
	migration: &'a Migration,
) -> impl Iterator<Item = MigrationKey> + 'a {
	changes[&migration.app_label]
		.iter()
		.take_while(move |m| m.name != migration.name)
		.map(Migration::key)
}

/// Index of the first operation of `kind` touching `field` (or the model when
/// `field` is `None`), panicking when absent.
pub fn position(migration: &Migration, kind: &str, model: &str, field: Option<&str>) -> usize {
	migration
		.operations
		.iter()
		.position(|op| {
			op.kind() == kind
				&& op.model_name_lower().as_deref() == Some(model)
				&& (field.is_none() || op.field_name() == field)
		})
		.unwrap_or_else(|| panic!("{kind} on {model}.{field:?} not found in {:?}", kinds(migration)))
}

/// A graph holding a linear history for `app_label`.
pub fn linear_graph(app_label: &str, names: &[&str]) -> MigrationGraph {
	let mut graph = MigrationGraph::new();
	for pair in names.windows(2) {
		graph.add_dependency(
			MigrationKey::new(app_label, pair[1]),
			MigrationKey::new(app_label, pair[0]),
		);
	}
	if let [only] = names {
		graph.add_node(MigrationKey::new(app_label, *only));
	}
	graph
}
