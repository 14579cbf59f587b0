//! # Reinhardt Autodetector
//!
//! Schema migration autodetection: compares two [`ProjectState`] snapshots and
//! produces, per application, an ordered list of [`Migration`]s whose
//! operations transform the first snapshot into the second.
//!
//! ## Pipeline
//!
//! 1. [`MigrationAutodetector`] walks the before/after states in a fixed phase
//!    order and emits operations, each tagged with dependency edges.
//! 2. The sequencer sorts every app's operations topologically and splits them
//!    into migrations so that cross-app dependencies are always satisfied.
//! 3. [`arrange_for_graph`] numbers and names the result against the existing
//!    on-disk [`MigrationGraph`]; [`trim_to_apps`] restricts the output.
//!
//! Ambiguous decisions (renames, defaults for new non-null columns) are
//! delegated to a [`MigrationQuestioner`].
//!
//! ## Example
//!
//! ```rust
//! use reinhardt_autodetector::prelude::*;
//!
//! let from_state = ProjectState::new();
//! let mut to_state = ProjectState::new();
//! to_state.add_model(
//! 	ModelState::new("blog", "Post")
//! 		.with_field("id", FieldState::auto())
//! 		.with_field("title", FieldState::char(200)),
//! );
//!
//! let questioner = NonInteractiveQuestioner::new();
//! let changes = MigrationAutodetector::new(from_state, to_state, Box::new(questioner))
//! 	.changes(&MigrationGraph::new(), &ChangesOptions::default())
//! 	.unwrap();
//!
//! let migrations = &changes["blog"];
//! assert_eq!(migrations.len(), 1);
//! assert_eq!(migrations[0].name, "0001_initial");
//! assert!(migrations[0].initial);
//! ```

pub mod arrange;
pub mod autodetector;
pub mod config;
pub mod deconstruct;
pub mod dependency;
pub mod graph;
pub mod migration;
pub mod namer;
pub mod operations;
pub mod questioner;
pub mod sequencer;
pub mod state;
pub mod swappable;

pub use arrange::{arrange_for_graph, parse_number, trim_to_apps};
pub use autodetector::{Changes, ChangesOptions, MigrationAutodetector};
pub use config::AutodetectorSettings;
pub use deconstruct::{
	CanonicalValue, Deconstructed, Deconstructible, RegexFlag, RegexPattern, Value,
};
pub use dependency::{
	DependencyKind, DependencyTarget, OperationDependency, PendingOperation, SwappableDependency,
};
pub use graph::{MigrationGraph, MigrationKey};
pub use migration::Migration;
pub use namer::suggest_name;
pub use operations::{
	AddConstraint, AddField, AddIndex, AlterField, AlterModelManagers, AlterModelOptions,
	AlterModelTable, AlterModelTableComment, AlterOrderWithRespectTo, AlterUniqueTogether,
	CreateModel, DeleteModel, MigrationOperation, Operation, RemoveConstraint, RemoveField,
	RemoveIndex, RenameField, RenameIndex, RenameModel, RunSql,
};
pub use questioner::{
	DefaultAnswer, DefaultQuestioner, MigrationQuestioner, NonInteractiveQuestioner,
	QuestionerDefaults,
};
#[cfg(feature = "interactive")]
pub use questioner::InteractiveQuestioner;
pub use state::{
	ConstraintKind, ConstraintState, FieldDefault, FieldKind, FieldState, GeneratedSpec,
	IndexState, ManagerState, ModelBase, ModelKey, ModelOptions, ModelState, ProjectState,
	Relation,
};
pub use swappable::SwappableSettings;

use thiserror::Error;

/// Errors raised while building states or detecting and arranging changes.
#[derive(Debug, Error)]
pub enum MigrationError {
	/// Malformed input at state-construction time.
	#[error("Invalid state: {0}")]
	InvalidState(String),

	/// A relation, field list or option names something absent from the target state.
	#[error("Unresolved reference in {model}: {reference}")]
	UnresolvedReference { model: String, reference: String },

	/// The questioner asked the user to supply the default by hand.
	#[error("A default is required for {model}.{field}; add one to the model and re-run")]
	DefaultRequired { model: String, field: String },

	#[error("Circular dependency detected: {cycle}")]
	CircularDependency { cycle: String },

	#[error("Questioner error: {0}")]
	Questioner(String),

	/// A state operation targets a model that is not in the state.
	#[error("Model not found: {0}")]
	ModelNotFound(String),

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

/// Result type for autodetector operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Prelude for the common detection workflow
pub mod prelude {
	pub use crate::{
		AutodetectorSettings, ChangesOptions, DefaultAnswer, FieldState, Migration,
		MigrationAutodetector, MigrationError, MigrationGraph, MigrationQuestioner, ModelKey,
		ModelState, NonInteractiveQuestioner, Operation, ProjectState, Result, Value,
	};
}
