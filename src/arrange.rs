//! Numbering and naming of generated migrations against an existing graph

use crate::autodetector::Changes;
use crate::graph::{FIRST_MIGRATION, LATEST_MIGRATION, MigrationGraph, MigrationKey};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

static SQUASHED_NUMBER: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r".*_squashed_(\d+)").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});
static LEADING_NUMBER: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^\d+").unwrap_or_else(|e| unreachable!("static regex: {e}")));

/// Number of a migration name.
///
/// Squashed migrations take the number of the last migration they replace.
///
/// # Example
///
/// ```rust
/// use reinhardt_autodetector::parse_number;
///
/// assert_eq!(parse_number("0001_initial"), Some(1));
/// assert_eq!(parse_number("0002_squashed_0005_auto"), Some(5));
/// assert_eq!(parse_number("initial"), None);
/// ```
pub fn parse_number(name: &str) -> Option<u32> {
	if let Some(caps) = SQUASHED_NUMBER.captures(name) {
		return caps[1].parse().ok();
	}
	LEADING_NUMBER
		.find(name)
		.and_then(|m| m.as_str().parse().ok())
}

/// Rename and renumber `changes` so they follow on from `graph`.
///
/// Each app continues from its highest existing number. The first new
/// migration of an app depends on the app's current leaf. Placeholder
/// dependencies (`auto_N`, `__first__`, `__latest__`) are rewritten to
/// concrete names. Order within an app is never changed.
pub fn arrange_for_graph(
	mut changes: Changes,
	graph: &MigrationGraph,
	migration_name: Option<&str>,
) -> Changes {
	let mut name_map: HashMap<MigrationKey, MigrationKey> = HashMap::new();

	for (app_label, migrations) in changes.iter_mut() {
		if migrations.is_empty() {
			continue;
		}
		let app_leaf = graph.leaf(app_label);
		let mut next_number = graph
			.app_migrations(app_label)
			.into_iter()
			.filter_map(parse_number)
			.max()
			.unwrap_or(0) + 1;

		for (i, migration) in migrations.iter_mut().enumerate() {
			if i == 0 {
				if let Some(leaf) = &app_leaf {
					migration.push_dependency(leaf.clone());
				}
			}
			let suffix = match migration_name {
				Some(name) => name.to_string(),
				None if i == 0 && app_leaf.is_none() => "initial".to_string(),
				None => migration.suggest_name(),
			};
			let new_name = format!("{next_number:04}_{suffix}");
			tracing::debug!(app = %app_label, from = %migration.name, to = %new_name, "naming migration");
			name_map.insert(
				MigrationKey::new(app_label.clone(), migration.name.clone()),
				MigrationKey::new(app_label.clone(), new_name.clone()),
			);
			migration.name = new_name;
			next_number += 1;
		}
	}

	let resolve_placeholder = |dep: &MigrationKey, changes: &Changes| -> Option<MigrationKey> {
		if let Some(leaf) = graph.leaf(&dep.app_label) {
			return Some(leaf);
		}
		let generated = changes.get(&dep.app_label)?;
		let target = if dep.name == FIRST_MIGRATION {
			generated.first()
		} else {
			generated.last()
		}?;
		Some(target.key())
	};

	let mut rewritten: Vec<(String, usize, Vec<MigrationKey>)> = Vec::new();
	for (app_label, migrations) in &changes {
		for (i, migration) in migrations.iter().enumerate() {
			let mut dependencies: Vec<MigrationKey> = Vec::with_capacity(migration.dependencies.len());
			for dep in &migration.dependencies {
				let dep = if let Some(renamed) = name_map.get(dep) {
					renamed.clone()
				} else if dep.name == FIRST_MIGRATION || dep.name == LATEST_MIGRATION {
					resolve_placeholder(dep, &changes).unwrap_or_else(|| dep.clone())
				} else {
					dep.clone()
				};
				if dep != migration.key() && !dependencies.contains(&dep) {
					dependencies.push(dep);
				}
			}
			rewritten.push((app_label.clone(), i, dependencies));
		}
	}
	for (app_label, i, dependencies) in rewritten {
		if let Some(migration) = changes.get_mut(&app_label).and_then(|m| m.get_mut(i)) {
			migration.dependencies = dependencies;
		}
	}
	changes
}

/// Keep only the migrations of `app_labels` and of every app they
/// (transitively) depend on.
///
/// Dependencies of kept migrations are never rewritten.
pub fn trim_to_apps(mut changes: Changes, app_labels: &BTreeSet<String>) -> Changes {
	let app_dependencies: HashMap<&str, BTreeSet<&str>> = changes
		.iter()
		.map(|(app_label, migrations)| {
			let deps = migrations
				.iter()
				.flat_map(|m| m.dependencies.iter().map(|d| d.app_label.as_str()))
				.collect();
			(app_label.as_str(), deps)
		})
		.collect();

	let mut required: BTreeSet<String> = app_labels.clone();
	let mut frontier: Vec<String> = required.iter().cloned().collect();
	while let Some(app_label) = frontier.pop() {
		for dep in app_dependencies.get(app_label.as_str()).into_iter().flatten() {
			if required.insert((*dep).to_string()) {
				frontier.push((*dep).to_string());
			}
		}
	}

	changes.retain(|app_label, _| required.contains(app_label));
	tracing::debug!(apps = ?required, "trimmed changes to requested apps");
	changes
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::migration::Migration;
	use crate::operations::{AddField, CreateModel};
	use crate::state::{FieldState, ModelOptions};
	use rstest::{fixture, rstest};

	fn create(name: &str) -> CreateModel {
		CreateModel::new(name, vec![("id".to_string(), FieldState::auto())], ModelOptions::default())
	}

	#[fixture]
	fn graph() -> MigrationGraph {
		let mut graph = MigrationGraph::new();
		graph.add_dependency(
			MigrationKey::new("blog", "0002_post_slug"),
			MigrationKey::new("blog", "0001_initial"),
		);
		graph
	}

	#[rstest]
	#[case("0001_initial", Some(1))]
	#[case("0042_auto_20240101_1200", Some(42))]
	#[case("0001_squashed_0004_auto", Some(4))]
	#[case("auto_1", None)]
	fn test_parse_number(#[case] name: &str, #[case] expected: Option<u32>) {
		assert_eq!(parse_number(name), expected);
	}

	#[rstest]
	fn test_new_app_starts_with_initial(graph: MigrationGraph) {
		let changes = Changes::from([(
			"shop".to_string(),
			vec![Migration::new("auto_1", "shop").add_operation(create("Product")).initial(true)],
		)]);

		let changes = arrange_for_graph(changes, &graph, None);

		assert_eq!(changes["shop"][0].name, "0001_initial");
		assert!(changes["shop"][0].dependencies.is_empty());
	}

	#[rstest]
	fn test_existing_app_continues_numbering_from_leaf(graph: MigrationGraph) {
		let changes = Changes::from([(
			"blog".to_string(),
			vec![
				Migration::new("auto_1", "blog")
					.add_operation(AddField::new("Post", "views", FieldState::integer())),
				Migration::new("auto_2", "blog")
					.add_operation(create("Tag"))
					.add_dependency("blog", "auto_1"),
			],
		)]);

		let changes = arrange_for_graph(changes, &graph, None);
		let blog = &changes["blog"];

		assert_eq!(blog[0].name, "0003_post_views");
		assert_eq!(blog[0].dependencies, vec![MigrationKey::new("blog", "0002_post_slug")]);
		assert_eq!(blog[1].name, "0004_tag");
		assert_eq!(blog[1].dependencies, vec![MigrationKey::new("blog", "0003_post_views")]);
	}

	/// **Test Intent**: Suggested names are used as-is, however long the
	/// model names behind them are.
	#[rstest]
	fn test_long_suggested_name_is_not_truncated(graph: MigrationGraph) {
		let model = "Publication".repeat(14);
		let changes = Changes::from([(
			"blog".to_string(),
			vec![Migration::new("auto_1", "blog").add_operation(create(&model))],
		)]);

		let changes = arrange_for_graph(changes, &graph, None);

		assert_eq!(
			changes["blog"][0].name,
			format!("0003_{}", model.to_lowercase())
		);
		assert!(changes["blog"][0].name.len() > 150);
	}

	#[rstest]
	fn test_name_override_applies_to_every_migration(graph: MigrationGraph) {
		let changes = Changes::from([(
			"blog".to_string(),
			vec![Migration::new("auto_1", "blog").add_operation(create("Tag"))],
		)]);

		let changes = arrange_for_graph(changes, &graph, Some("tags"));

		assert_eq!(changes["blog"][0].name, "0003_tags");
	}

	#[rstest]
	fn test_cross_app_placeholders_are_rewritten(graph: MigrationGraph) {
		let changes = Changes::from([
			(
				"shop".to_string(),
				vec![
					Migration::new("auto_1", "shop")
						.add_operation(create("Order"))
						.add_dependency("blog", "__first__")
						.add_dependency("accounts", "auto_1"),
				],
			),
			(
				"accounts".to_string(),
				vec![Migration::new("auto_1", "accounts").add_operation(create("Member"))],
			),
		]);

		let changes = arrange_for_graph(changes, &graph, None);

		assert_eq!(
			changes["shop"][0].dependencies,
			vec![
				MigrationKey::new("blog", "0002_post_slug"),
				MigrationKey::new("accounts", "0001_initial"),
			]
		);
	}

	#[rstest]
	fn test_unknown_placeholder_is_left_alone() {
		let changes = Changes::from([(
			"shop".to_string(),
			vec![
				Migration::new("auto_1", "shop")
					.add_operation(create("Order"))
					.add_dependency("legacy", "__first__"),
			],
		)]);

		let changes = arrange_for_graph(changes, &MigrationGraph::new(), None);

		assert_eq!(changes["shop"][0].dependencies, vec![MigrationKey::new("legacy", "__first__")]);
	}

	#[rstest]
	fn test_trim_keeps_transitive_dependencies() {
		let changes = Changes::from([
			(
				"shop".to_string(),
				vec![Migration::new("0001_initial", "shop").add_dependency("accounts", "0001_initial")],
			),
			(
				"accounts".to_string(),
				vec![Migration::new("0001_initial", "accounts").add_dependency("core", "0001_initial")],
			),
			("core".to_string(), vec![Migration::new("0001_initial", "core")]),
			("blog".to_string(), vec![Migration::new("0001_initial", "blog")]),
		]);

		let trimmed = trim_to_apps(changes, &BTreeSet::from(["shop".to_string()]));

		assert_eq!(
			trimmed.keys().cloned().collect::<Vec<_>>(),
			["accounts", "core", "shop"]
		);
		assert_eq!(
			trimmed["shop"][0].dependencies,
			vec![MigrationKey::new("accounts", "0001_initial")]
		);
	}
}
