//! Migration name suggestion

use crate::operations::{MigrationOperation, Operation};
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;

/// Operations named individually before the rest is summarised.
const MAX_NAMED_OPERATIONS: usize = 3;

static INVALID_NAME_CHARS: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"[^a-z0-9_]").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Opaque timestamped name, `auto_YYYYMMDD_HHMM`.
pub fn auto_name() -> String {
	format!("auto_{}", Local::now().format("%Y%m%d_%H%M"))
}

/// Derive a readable migration name from its operations.
///
/// # Example
///
/// ```rust
/// use reinhardt_autodetector::{AddField, CreateModel, FieldState, ModelOptions, Operation, suggest_name};
///
/// let ops: Vec<Operation> = vec![
/// 	CreateModel::new("Author", vec![], ModelOptions::default()).into(),
/// 	AddField::new("Book", "author", FieldState::foreign_key(("library", "Author"))).into(),
/// ];
/// assert_eq!(suggest_name(&ops, false), "author_book_author");
/// assert_eq!(suggest_name(&[], true), "initial");
/// ```
pub fn suggest_name(operations: &[Operation], initial: bool) -> String {
	if operations.is_empty() {
		return if initial {
			"initial".to_string()
		} else {
			auto_name()
		};
	}

	let fragments: Vec<String> = operations
		.iter()
		.filter_map(<Operation as MigrationOperation>::migration_name_fragment)
		.map(|fragment| {
			INVALID_NAME_CHARS
				.replace_all(&fragment.to_lowercase(), "_")
				.into_owned()
		})
		.collect();

	if fragments.is_empty() {
		return auto_name();
	}

	let mut name = fragments
		.iter()
		.take(MAX_NAMED_OPERATIONS)
		.map(String::as_str)
		.collect::<Vec<_>>()
		.join("_");
	if fragments.len() > MAX_NAMED_OPERATIONS {
		name.push_str("_and_more");
	}
	name
}
