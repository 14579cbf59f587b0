//! Dependency sequencing
//!
//! Turns the per-app operation lists produced by the autodetector into
//! migrations:
//!
//! 1. Each app's operations are sorted topologically over their same-app
//!    dependency edges. Sorting is stable: within a layer, operations keep the
//!    order they were emitted in.
//! 2. Operations are taken from the front of each app's list as long as their
//!    cross-app dependencies are met, and collected into a migration. When no
//!    app can make progress the sequencer switches to "chop mode" and cuts a
//!    migration at the first blocked operation, pointing the unmet
//!    dependencies at existing graph leaves.

use crate::autodetector::Changes;
use crate::dependency::{PendingOperation, ResolvedDependency, SwappableDependency};
use crate::graph::{FIRST_MIGRATION, MigrationGraph, MigrationKey};
use crate::migration::Migration;
use crate::operations::MigrationOperation;
use crate::swappable::SwappableSettings;
use crate::{MigrationError, Result};
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Sort one app's operations so that every same-app dependency comes first.
///
/// # Errors
///
/// Returns [`MigrationError::CircularDependency`] naming the operations of
/// the cycle when the edges cannot be ordered.
pub fn sort_app_operations(
	app_label: &str,
	operations: Vec<PendingOperation>,
	settings: &SwappableSettings,
) -> Result<Vec<PendingOperation>> {
	let count = operations.len();
	let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(count, 0);
	let nodes: Vec<NodeIndex> = (0..count).map(|i| graph.add_node(i)).collect();

	for (i, pending) in operations.iter().enumerate() {
		for dep in &pending.dependencies {
			let resolved = dep.resolve(settings);
			if resolved.key.app_label != app_label {
				continue;
			}
			for (j, other) in operations.iter().enumerate() {
				if i != j && resolved.is_satisfied_by(&other.operation) {
					graph.update_edge(nodes[j], nodes[i], ());
				}
			}
		}
	}

	let mut placed = vec![false; count];
	let mut order = Vec::with_capacity(count);
	while order.len() < count {
		let layer: Vec<usize> = (0..count)
			.filter(|&i| {
				!placed[i]
					&& graph
						.neighbors_directed(nodes[i], Direction::Incoming)
						.all(|parent| placed[graph[parent]])
			})
			.collect();
		if layer.is_empty() {
			return Err(cycle_error(app_label, &graph, &placed, &operations));
		}
		for i in layer {
			placed[i] = true;
			order.push(i);
		}
	}

	let mut slots: Vec<Option<PendingOperation>> = operations.into_iter().map(Some).collect();
	Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

fn cycle_error(
	app_label: &str,
	graph: &DiGraph<usize, ()>,
	placed: &[bool],
	operations: &[PendingOperation],
) -> MigrationError {
	let cycle = tarjan_scc(graph)
		.into_iter()
		.find(|scc| scc.len() > 1 && scc.iter().all(|n| !placed[graph[*n]]))
		.map(|scc| {
			let mut members: Vec<usize> = scc.into_iter().map(|n| graph[n]).collect();
			members.sort_unstable();
			members
		})
		.unwrap_or_else(|| (0..operations.len()).filter(|&i| !placed[i]).collect());
	let described: Vec<String> = cycle
		.into_iter()
		.map(|i| operations[i].operation.describe())
		.collect();
	MigrationError::CircularDependency {
		cycle: format!("{app_label}: {}", described.join(" -> ")),
	}
}

/// Cross-app requirements of one operation that are already met.
#[derive(Default)]
struct MetDependencies {
	migrations: Vec<MigrationKey>,
	swappable: Vec<SwappableDependency>,
}

pub struct Sequencer<'a> {
	settings: &'a SwappableSettings,
	graph: &'a MigrationGraph,
	/// Apps that already have models in the starting state.
	existing_apps: &'a BTreeSet<String>,
}

impl<'a> Sequencer<'a> {
	pub fn new(
		settings: &'a SwappableSettings,
		graph: &'a MigrationGraph,
		existing_apps: &'a BTreeSet<String>,
	) -> Self {
		Self {
			settings,
			graph,
			existing_apps,
		}
	}

	/// Sort every app and split the operations into migrations named
	/// `auto_1`, `auto_2`, ... per app.
	pub fn sequence(&self, generated: BTreeMap<String, Vec<PendingOperation>>) -> Result<Changes> {
		let mut queues: BTreeMap<String, VecDeque<PendingOperation>> = BTreeMap::new();
		for (app_label, operations) in generated {
			if operations.is_empty() {
				continue;
			}
			let sorted = sort_app_operations(&app_label, operations, self.settings)?;
			queues.insert(app_label, sorted.into());
		}
		self.build_migrations(queues)
	}

	fn build_migrations(
		&self,
		mut queues: BTreeMap<String, VecDeque<PendingOperation>>,
	) -> Result<Changes> {
		let mut changes = Changes::new();
		let mut remaining = pending_count(&queues);
		let mut chop_mode = false;
		let app_labels: Vec<String> = queues.keys().cloned().collect();

		while remaining > 0 {
			for app_label in &app_labels {
				let mut queue = queues.remove(app_label).unwrap_or_default();
				let mut chopped: Vec<PendingOperation> = Vec::new();
				let mut dependencies: BTreeSet<MigrationKey> = BTreeSet::new();
				let mut swappable: BTreeSet<SwappableDependency> = BTreeSet::new();

				while let Some(pending) = queue.front() {
					let Some(met) = self.met_dependencies(app_label, pending, &queues, &changes, chop_mode)
					else {
						break;
					};
					dependencies.extend(met.migrations);
					swappable.extend(met.swappable);
					if let Some(pending) = queue.pop_front() {
						chopped.push(pending);
					}
				}

				if !chopped.is_empty() {
					if queue.is_empty() || chop_mode {
						let app_migrations = changes.entry(app_label.clone()).or_default();
						let initial = app_migrations.is_empty()
							&& !self.existing_apps.contains(app_label)
							&& !self.graph.has_app(app_label);
						let mut migration =
							Migration::new(format!("auto_{}", app_migrations.len() + 1), app_label.clone())
								.initial(initial);
						migration.operations = chopped.into_iter().map(|p| p.operation).collect();
						migration.dependencies = dependencies.into_iter().collect();
						migration.swappable_dependencies = swappable.into_iter().collect();
						tracing::trace!(
							app = %app_label,
							migration = %migration.name,
							operations = migration.operations.len(),
							chop_mode,
							"cut migration"
						);
						app_migrations.push(migration);
						chop_mode = false;
					} else {
						for pending in chopped.into_iter().rev() {
							queue.push_front(pending);
						}
					}
				}
				queues.insert(app_label.clone(), queue);
			}

			let now_remaining = pending_count(&queues);
			if now_remaining == remaining {
				if chop_mode {
					return Err(MigrationError::CircularDependency {
						cycle: describe_blocked(&queues),
					});
				}
				tracing::trace!(remaining, "no progress; switching to chop mode");
				chop_mode = true;
			}
			remaining = now_remaining;
		}

		for (app_label, migrations) in changes.iter_mut() {
			for i in 1..migrations.len() {
				let previous = MigrationKey::new(app_label.clone(), migrations[i - 1].name.clone());
				migrations[i].push_dependency(previous);
			}
			for migration in migrations.iter_mut() {
				migration.dependencies.sort();
				migration.dependencies.dedup();
			}
		}

		tracing::info!(
			apps = changes.len(),
			migrations = changes.values().map(Vec::len).sum::<usize>(),
			"sequenced detected changes"
		);
		Ok(changes)
	}

	/// Cross-app dependencies of `pending`, or `None` while one of them is
	/// still waiting on an unsequenced operation.
	fn met_dependencies(
		&self,
		app_label: &str,
		pending: &PendingOperation,
		queues: &BTreeMap<String, VecDeque<PendingOperation>>,
		changes: &Changes,
		chop_mode: bool,
	) -> Option<MetDependencies> {
		let mut met = MetDependencies::default();
		for dep in &pending.dependencies {
			let resolved: ResolvedDependency = dep.resolve(self.settings);
			let dep_app = resolved.key.app_label.as_str();
			if dep_app == app_label {
				continue;
			}
			let waiting = queues
				.get(dep_app)
				.is_some_and(|ops| ops.iter().any(|other| resolved.is_satisfied_by(&other.operation)));
			if waiting {
				return None;
			}

			if let Some(setting) = &resolved.setting {
				met.swappable.push(SwappableDependency::new(setting.clone(), dep_app));
			}
			if let Some(last) = changes.get(dep_app).and_then(|m| m.last()) {
				met.migrations.push(last.key());
			} else if chop_mode {
				met.migrations.push(
					self.graph
						.leaf(dep_app)
						.unwrap_or_else(|| MigrationKey::new(dep_app, FIRST_MIGRATION)),
				);
			} else if resolved.setting.is_some() {
				met.migrations.push(MigrationKey::new(dep_app, FIRST_MIGRATION));
			} else {
				return None;
			}
		}
		Some(met)
	}
}

fn pending_count(queues: &BTreeMap<String, VecDeque<PendingOperation>>) -> usize {
	queues.values().map(VecDeque::len).sum()
}

fn describe_blocked(queues: &BTreeMap<String, VecDeque<PendingOperation>>) -> String {
	queues
		.iter()
		.filter_map(|(app_label, queue)| {
			let front = queue.front()?;
			let waiting_on: Vec<String> = front.dependencies.iter().map(ToString::to_string).collect();
			Some(format!(
				"{app_label}: {} waiting on [{}]",
				front.operation.describe(),
				waiting_on.join(", ")
			))
		})
		.collect::<Vec<_>>()
		.join("; ")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dependency::OperationDependency;
	use crate::operations::{AddField, CreateModel, Operation};
	use crate::state::{FieldState, ModelKey, ModelOptions};
	use rstest::rstest;

	fn create(name: &str) -> CreateModel {
		CreateModel::new(name, vec![("id".to_string(), FieldState::auto())], ModelOptions::default())
	}

	fn names(ops: &[PendingOperation]) -> Vec<String> {
		ops.iter().map(|p| p.operation.describe()).collect()
	}

	#[rstest]
	fn test_sort_is_stable_without_edges() {
		let ops = vec![
			PendingOperation::new(create("B")),
			PendingOperation::new(create("A")),
		];

		let sorted = sort_app_operations("shop", ops, &SwappableSettings::new()).unwrap();

		assert_eq!(names(&sorted), ["Create model B", "Create model A"]);
	}

	#[rstest]
	fn test_sort_moves_dependency_first() {
		let ops = vec![
			PendingOperation::new(AddField::new("Order", "customer", FieldState::foreign_key(("shop", "Customer"))))
				.with_dependencies([OperationDependency::create_model(&ModelKey::new("shop", "customer"))]),
			PendingOperation::new(create("Customer")),
		];

		let sorted = sort_app_operations("shop", ops, &SwappableSettings::new()).unwrap();

		assert_eq!(names(&sorted), ["Create model Customer", "Add field customer to Order"]);
	}

	#[rstest]
	fn test_cycle_names_its_operations() {
		let ops = vec![
			PendingOperation::new(create("A"))
				.with_dependencies([OperationDependency::create_model(&ModelKey::new("shop", "b"))]),
			PendingOperation::new(create("B"))
				.with_dependencies([OperationDependency::create_model(&ModelKey::new("shop", "a"))]),
			PendingOperation::new(create("C")),
		];

		let err = sort_app_operations("shop", ops, &SwappableSettings::new()).unwrap_err();

		let message = err.to_string();
		assert!(matches!(err, MigrationError::CircularDependency { .. }));
		assert!(message.contains("Create model A") && message.contains("Create model B"), "{message}");
		assert!(!message.contains("Create model C"), "{message}");
	}

	#[rstest]
	fn test_cross_app_dependency_orders_migrations() {
		let settings = SwappableSettings::new();
		let graph = MigrationGraph::new();
		let existing = BTreeSet::new();
		let generated = BTreeMap::from([
			(
				"accounts".to_string(),
				vec![PendingOperation::new(create("Member"))],
			),
			(
				"billing".to_string(),
				vec![
					PendingOperation::new(create("Invoice"))
						.with_dependencies([OperationDependency::create_model(&ModelKey::new("accounts", "member"))]),
				],
			),
		]);

		let changes = Sequencer::new(&settings, &graph, &existing).sequence(generated).unwrap();

		assert_eq!(changes["accounts"].len(), 1);
		assert_eq!(
			changes["billing"][0].dependencies,
			vec![MigrationKey::new("accounts", "auto_1")]
		);
		assert!(changes["billing"][0].initial);
	}

	#[rstest]
	fn test_mutual_cross_app_dependencies_are_chopped() {
		let settings = SwappableSettings::new();
		let graph = MigrationGraph::new();
		let existing = BTreeSet::new();
		let author = ModelKey::new("library", "author");
		let shop = ModelKey::new("shop", "store");
		let generated = BTreeMap::from([
			(
				"library".to_string(),
				vec![
					PendingOperation::new(create("Author")),
					PendingOperation::new(AddField::new("Author", "store", FieldState::foreign_key(("shop", "Store"))))
						.with_dependencies([
							OperationDependency::create_model(&author),
							OperationDependency::create_model(&shop),
						]),
				],
			),
			(
				"shop".to_string(),
				vec![
					PendingOperation::new(create("Store")),
					PendingOperation::new(AddField::new("Store", "owner", FieldState::foreign_key(("library", "Author"))))
						.with_dependencies([
							OperationDependency::create_model(&shop),
							OperationDependency::create_model(&author),
						]),
				],
			),
		]);

		let changes = Sequencer::new(&settings, &graph, &existing).sequence(generated).unwrap();

		let library = &changes["library"];
		assert_eq!(library.len(), 2);
		assert!(matches!(library[0].operations[0], Operation::CreateModel(_)));
		assert!(library[0].initial);
		assert!(!library[1].initial);
		assert!(library[1].dependencies.contains(&MigrationKey::new("library", "auto_1")));
		assert!(changes["shop"].iter().all(|m| !m.operations.is_empty()));
	}

	#[rstest]
	fn test_swappable_target_records_setting() {
		let settings = SwappableSettings::new().with_setting("AUTH_USER_MODEL", "accounts.Member");
		let graph = MigrationGraph::new();
		let existing = BTreeSet::new();
		let generated = BTreeMap::from([(
			"blog".to_string(),
			vec![
				PendingOperation::new(create("Post")).with_dependencies([OperationDependency::swappable(
					"AUTH_USER_MODEL",
					&ModelKey::new("auth", "user"),
				)]),
			],
		)]);

		let changes = Sequencer::new(&settings, &graph, &existing).sequence(generated).unwrap();

		let post = &changes["blog"][0];
		assert_eq!(
			post.swappable_dependencies,
			vec![SwappableDependency::new("AUTH_USER_MODEL", "accounts")]
		);
		assert_eq!(post.dependencies, vec![MigrationKey::new("accounts", "__first__")]);
	}

	#[rstest]
	fn test_missing_external_app_resolves_to_graph_leaf() {
		let settings = SwappableSettings::new();
		let mut graph = MigrationGraph::new();
		graph.add_node(MigrationKey::new("accounts", "0003_member_email"));
		let existing = BTreeSet::from(["blog".to_string()]);
		let generated = BTreeMap::from([(
			"blog".to_string(),
			vec![
				PendingOperation::new(AddField::new("Post", "author", FieldState::foreign_key(("accounts", "Member"))))
					.with_dependencies([OperationDependency::create_model(&ModelKey::new("accounts", "member"))]),
			],
		)]);

		let changes = Sequencer::new(&settings, &graph, &existing).sequence(generated).unwrap();

		assert_eq!(
			changes["blog"][0].dependencies,
			vec![MigrationKey::new("accounts", "0003_member_email")]
		);
		assert!(!changes["blog"][0].initial);
	}
}
