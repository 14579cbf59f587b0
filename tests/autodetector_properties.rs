//! Autodetector property-based tests
//!
//! Random pairs of small two-app project states are diffed; the generated
//! migrations must be empty for identical states, well-formed, and must
//! turn the old state into the new one when replayed.

mod common;

use common::{all_migrations, apply_changes, detect, state};
use proptest::prelude::*;
use reinhardt_autodetector::{FieldState, MigrationKey, ModelState, ProjectState};
use rstest::*;
use std::collections::BTreeSet;

/// `(app_label, model name)` in declaration order; each model may link to
/// the closest present model declared before it.
const MODELS: [(&str, &str); 3] = [("library", "Author"), ("shop", "Book"), ("shop", "Shelf")];

/// Per model: present, has `title`, has `count`, has `link`, `title` length.
type ModelShape = (bool, bool, bool, bool, u32);

fn shapes() -> impl Strategy<Value = Vec<ModelShape>> {
	prop::collection::vec(
		(any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), 1u32..4),
		MODELS.len(),
	)
}

fn build_state(shapes: &[ModelShape]) -> ProjectState {
	let mut models = Vec::new();
	let mut previous: Option<(&str, &str)> = None;
	for (&(app_label, name), &(present, title, count, link, length)) in MODELS.iter().zip(shapes) {
		if !present {
			continue;
		}
		let mut model = ModelState::new(app_label, name).with_field("id", FieldState::auto());
		if title {
			model = model.with_field("title", FieldState::char(length * 50));
		}
		if count {
			model = model.with_field("count", FieldState::integer().null());
		}
		if let (true, Some(target)) = (link, previous) {
			model = model.with_field("link", FieldState::foreign_key(target).null());
		}
		models.push(model);
		previous = Some((app_label, name));
	}
	state(models)
}

// ============================================================================
// Property-Based Tests: detection
// ============================================================================

proptest! {
	#![proptest_config(ProptestConfig::with_cases(64))]

	/// Test: Identical states produce no changes
	///
	/// Category: Property
	/// Verifies that diffing a state with itself yields nothing.
	#[rstest]
	fn prop_identical_states_are_unchanged(shapes in shapes()) {
		let project = build_state(&shapes);

		let changes = detect(&project, &project).unwrap();

		prop_assert!(changes.is_empty());
	}

	/// Test: Replaying detected changes
	///
	/// Category: Property
	/// Verifies that applying every migration in dependency order turns the
	/// old state into one equivalent to the new state.
	#[rstest]
	fn prop_replay_reaches_target(from in shapes(), to in shapes()) {
		let from = build_state(&from);
		let to = build_state(&to);

		let changes = detect(&from, &to).unwrap();

		prop_assert!(apply_changes(&from, &changes).is_equivalent(&to));
	}

	/// Test: Dependencies are well-formed
	///
	/// Category: Property
	/// Verifies that no migration is empty or depends on itself, and that
	/// every dependency names a generated migration or a placeholder.
	#[rstest]
	fn prop_dependencies_are_resolvable(from in shapes(), to in shapes()) {
		let from = build_state(&from);
		let to = build_state(&to);

		let changes = detect(&from, &to).unwrap();
		let generated: BTreeSet<MigrationKey> =
			all_migrations(&changes).iter().map(|m| m.key()).collect();

		for migration in all_migrations(&changes) {
			prop_assert!(!migration.operations.is_empty());
			for dependency in &migration.dependencies {
				prop_assert_ne!(dependency, &migration.key());
				prop_assert!(generated.contains(dependency) || dependency.is_placeholder());
			}
		}
	}
}
