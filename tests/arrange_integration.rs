//! Arranging detected changes against an existing migration graph
//!
//! These tests go through [`MigrationAutodetector::changes`], the entry point
//! used when writing migrations to disk: numbering continues from the graph,
//! new migrations hang off the current leaves, and output can be trimmed.

mod common;

use common::{linear_graph, state};
use reinhardt_autodetector::{
	AutodetectorSettings, ChangesOptions, FieldState, MigrationAutodetector, MigrationGraph,
	MigrationKey, ModelState, NonInteractiveQuestioner, Operation, ProjectState,
};
use rstest::*;

fn post() -> ModelState {
	ModelState::new("blog", "Post")
		.with_field("id", FieldState::auto())
		.with_field("title", FieldState::char(200))
}

fn detector(from: ProjectState, to: ProjectState) -> MigrationAutodetector {
	MigrationAutodetector::new(from, to, Box::new(NonInteractiveQuestioner::new()))
}

#[fixture]
fn blog_history() -> MigrationGraph {
	linear_graph("blog", &["0001_initial", "0002_post_slug"])
}

// ============================================================================
// Numbering and naming
// ============================================================================

/// **Test Intent**: A change to an app with history continues its numbering
/// and depends on its leaf.
#[rstest]
fn test_numbering_continues_from_graph(blog_history: MigrationGraph) {
	let to = state([post().with_field("views", FieldState::integer().null())]);

	let changes = detector(state([post()]), to)
		.changes(&blog_history, &ChangesOptions::default())
		.unwrap();

	let migration = &changes["blog"][0];
	assert_eq!(migration.name, "0003_post_views");
	assert!(!migration.initial);
	assert_eq!(
		migration.dependencies,
		vec![MigrationKey::new("blog", "0002_post_slug")]
	);
}

#[rstest]
fn test_name_override_replaces_suggestion(blog_history: MigrationGraph) {
	let to = state([post().with_field("views", FieldState::integer().null())]);
	let options = ChangesOptions::new().with_migration_name("backfill");

	let changes = detector(state([post()]), to)
		.changes(&blog_history, &options)
		.unwrap();

	assert_eq!(changes["blog"][0].name, "0003_backfill");
}

/// **Test Intent**: Placeholder dependencies on new migrations of other apps
/// are rewritten to their final names.
#[rstest]
fn test_cross_app_dependency_uses_final_name() {
	let author = ModelState::new("authors", "Author").with_field("id", FieldState::auto());
	let to = state([
		author,
		post().with_field("author", FieldState::foreign_key(("authors", "Author"))),
	]);

	let changes = detector(state([]), to)
		.changes(&MigrationGraph::new(), &ChangesOptions::default())
		.unwrap();

	assert_eq!(changes["authors"][0].name, "0001_initial");
	assert_eq!(changes["blog"][0].name, "0001_initial");
	assert_eq!(
		changes["blog"][0].dependencies,
		vec![MigrationKey::new("authors", "0001_initial")]
	);
}

/// **Test Intent**: A swappable dependency on an app without new migrations
/// resolves to that app's existing migration.
#[rstest]
fn test_swappable_dependency_resolves_to_existing_migration() {
	let settings = AutodetectorSettings::from_toml_str(
		r#"
[swappable_models]
AUTH_USER_MODEL = "accounts.Member"
"#,
	)
	.unwrap();
	let member = ModelState::new("accounts", "Member").with_field("id", FieldState::auto());
	let to = state([
		member.clone(),
		post().with_field(
			"author",
			FieldState::foreign_key(("accounts", "Member")).swappable("AUTH_USER_MODEL"),
		),
	]);
	let graph = linear_graph("accounts", &["0001_initial"]);

	let changes = MigrationAutodetector::new(state([member]), to, settings.questioner())
		.with_swappable_settings(settings.swappable_settings())
		.changes(&graph, &ChangesOptions::default())
		.unwrap();

	let migration = &changes["blog"][0];
	assert_eq!(migration.name, "0001_initial");
	assert!(migration.initial);
	assert_eq!(
		migration.dependencies,
		vec![MigrationKey::new("accounts", "0001_initial")]
	);
	assert_eq!(migration.swappable_dependencies.len(), 1);
}

// ============================================================================
// Trimming
// ============================================================================

#[rstest]
#[case::dependent_app(&["blog"], &["authors", "blog"])]
#[case::dependency_only(&["authors"], &["authors"])]
fn test_trim_keeps_required_apps(#[case] requested: &[&str], #[case] expected: &[&str]) {
	let author = ModelState::new("authors", "Author").with_field("id", FieldState::auto());
	let to = state([
		author,
		post().with_field("author", FieldState::foreign_key(("authors", "Author"))),
	]);
	let options = ChangesOptions::new().with_trim_to_apps(requested.iter().copied());

	let changes = detector(state([]), to)
		.changes(&MigrationGraph::new(), &options)
		.unwrap();

	assert_eq!(changes.keys().map(String::as_str).collect::<Vec<_>>(), expected);
}

// ============================================================================
// Configuration
// ============================================================================

/// **Test Intent**: A configured one-off default reaches the generated
/// `AddField` through the settings-built questioner.
#[rstest]
fn test_settings_questioner_supplies_default(blog_history: MigrationGraph) {
	let settings = AutodetectorSettings::from_toml_str(
		r#"
strict_defaults = true

[questioner]
not_null_default = { type = "int", value = 0 }
"#,
	)
	.unwrap();
	let to = state([post().with_field("views", FieldState::integer())]);

	let changes = MigrationAutodetector::new(state([post()]), to, settings.questioner())
		.changes(&blog_history, &ChangesOptions::default())
		.unwrap();

	let Operation::AddField(add) = &changes["blog"][0].operations[0] else {
		panic!("expected AddField");
	};
	assert!(!add.preserve_default);
}

#[rstest]
fn test_strict_settings_without_default_fail(blog_history: MigrationGraph) {
	let settings = AutodetectorSettings::from_toml_str("strict_defaults = true").unwrap();
	let to = state([post().with_field("views", FieldState::integer())]);

	let result = MigrationAutodetector::new(state([post()]), to, settings.questioner())
		.changes(&blog_history, &ChangesOptions::default());

	assert!(result.is_err());
}
