//! Special operations

use super::MigrationOperation;
use crate::Result;
use crate::state::ProjectState;
use serde::{Deserialize, Serialize};

/// Raw SQL. Leaves the project state untouched and has no natural name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSql {
	pub sql: String,
	pub reverse_sql: Option<String>,
}

impl RunSql {
	pub fn new(sql: impl Into<String>) -> Self {
		Self {
			sql: sql.into(),
			reverse_sql: None,
		}
	}

	pub fn with_reverse_sql(mut self, reverse_sql: impl Into<String>) -> Self {
		self.reverse_sql = Some(reverse_sql.into());
		self
	}
}

impl MigrationOperation for RunSql {
	fn migration_name_fragment(&self) -> Option<String> {
		None
	}

	fn describe(&self) -> String {
		"Raw SQL operation".to_string()
	}

	fn state_forwards(&self, _app_label: &str, _state: &mut ProjectState) -> Result<()> {
		Ok(())
	}
}
