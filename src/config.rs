//! Autodetector settings
//!
//! Settings are read from TOML:
//!
//! ```toml
//! interactive = false
//! strict_defaults = true
//! migration_name = "backfill"
//!
//! [swappable_models]
//! AUTH_USER_MODEL = "accounts.Member"
//!
//! [questioner]
//! ask_rename = true
//! not_null_default = { type = "int", value = 0 }
//! ```

use crate::questioner::{
	DefaultQuestioner, MigrationQuestioner, NonInteractiveQuestioner, QuestionerDefaults,
};
use crate::swappable::SwappableSettings;
use crate::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutodetectorSettings {
	/// Prompt on the terminal. Ignored without the `interactive` feature.
	pub interactive: bool,

	/// Fail instead of continuing when a default is missing.
	pub strict_defaults: bool,

	/// Name override for a single new migration.
	pub migration_name: Option<String>,

	/// Swappable settings, e.g. `AUTH_USER_MODEL = "accounts.Member"`.
	pub swappable_models: BTreeMap<String, String>,

	/// Preset answers. When `ask_rename` or `ask_rename_model` is set the
	/// answers are used verbatim instead of the non-interactive rules.
	pub questioner: QuestionerDefaults,
}

impl AutodetectorSettings {
	/// Load settings from a TOML file.
	///
	/// # Errors
	///
	/// Returns an error if the file cannot be read or parsed.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let content = std::fs::read_to_string(path.as_ref())?;
		Self::from_toml_str(&content)
	}

	pub fn from_toml_str(content: &str) -> Result<Self> {
		toml::from_str(content).map_err(|e| MigrationError::Config(e.to_string()))
	}

	pub fn swappable_settings(&self) -> SwappableSettings {
		SwappableSettings::from_settings(self.swappable_models.clone())
	}

	/// Build the questioner these settings describe.
	pub fn questioner(&self) -> Box<dyn MigrationQuestioner> {
		#[cfg(feature = "interactive")]
		if self.interactive {
			return Box::new(crate::questioner::InteractiveQuestioner::new());
		}
		#[cfg(not(feature = "interactive"))]
		if self.interactive {
			tracing::warn!("interactive questioner requested but the feature is disabled");
		}

		if self.questioner.ask_rename || self.questioner.ask_rename_model {
			return Box::new(DefaultQuestioner::new(self.questioner.clone()));
		}
		Box::new(
			NonInteractiveQuestioner::new()
				.with_defaults(self.questioner.clone())
				.strict(self.strict_defaults),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::deconstruct::Value;
	use crate::questioner::DefaultAnswer;
	use crate::state::{FieldState, ModelKey};
	use rstest::rstest;
	use std::io::Write;

	const SETTINGS: &str = r#"
strict_defaults = true
migration_name = "backfill"

[swappable_models]
AUTH_USER_MODEL = "accounts.Member"

[questioner]
ask_rename = true
not_null_default = { type = "int", value = 0 }
"#;

	#[rstest]
	fn test_default_settings() {
		let settings = AutodetectorSettings::default();

		assert!(!settings.interactive);
		assert!(settings.swappable_models.is_empty());
		assert!(settings.migration_name.is_none());
	}

	#[rstest]
	fn test_parse_toml_settings() {
		let settings = AutodetectorSettings::from_toml_str(SETTINGS).unwrap();

		assert!(settings.strict_defaults);
		assert_eq!(settings.migration_name.as_deref(), Some("backfill"));
		assert_eq!(
			settings.swappable_settings().resolve("AUTH_USER_MODEL"),
			Some(ModelKey::new("accounts", "member"))
		);
		assert_eq!(settings.questioner.not_null_default, Some(Value::Int(0)));
	}

	#[rstest]
	fn test_preset_answers_drive_the_questioner() {
		let settings = AutodetectorSettings::from_toml_str(SETTINGS).unwrap();
		let questioner = settings.questioner();

		assert!(questioner.ask_rename("post", "a", "b", &FieldState::integer()).unwrap());
		assert_eq!(
			questioner.ask_not_null_addition("views", "post").unwrap(),
			DefaultAnswer::Value(Value::Int(0))
		);
	}

	#[rstest]
	fn test_strict_without_presets_refuses_missing_defaults() {
		let settings = AutodetectorSettings::from_toml_str("strict_defaults = true").unwrap();

		assert_eq!(
			settings.questioner().ask_not_null_addition("views", "post").unwrap(),
			DefaultAnswer::ProvideManually
		);
	}

	#[rstest]
	fn test_load_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(SETTINGS.as_bytes()).unwrap();

		let settings = AutodetectorSettings::from_file(file.path()).unwrap();

		assert_eq!(settings.swappable_models["AUTH_USER_MODEL"], "accounts.Member");
	}

	#[rstest]
	fn test_invalid_toml_is_a_config_error() {
		let err = AutodetectorSettings::from_toml_str("interactive = ").unwrap_err();

		assert!(matches!(err, MigrationError::Config(_)));
	}

	#[rstest]
	fn test_missing_file_is_an_io_error() {
		let err = AutodetectorSettings::from_file("/nonexistent/autodetector.toml").unwrap_err();

		assert!(matches!(err, MigrationError::Io(_)));
	}
}
