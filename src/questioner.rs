//! Questioner: the decision oracle for ambiguous changes
//!
//! The autodetector never guesses. Whenever a change is ambiguous (a field
//! that might be a rename, a new non-null column with no default) it asks a
//! [`MigrationQuestioner`] and branches on the answer.
//!
//! Three implementations are provided:
//! - [`DefaultQuestioner`]: answers from [`QuestionerDefaults`], for scripted runs and tests
//! - [`NonInteractiveQuestioner`]: never confirms renames; substitutes or refuses defaults
//! - `InteractiveQuestioner`: terminal prompts via `dialoguer` (feature `interactive`)

use crate::Result;
use crate::deconstruct::Value;
use crate::state::{FieldState, ModelState};
use serde::{Deserialize, Serialize};

/// Answer to a request for a default value.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultAnswer {
	/// Use this value to fill existing rows.
	Value(Value),
	/// Proceed without a default; existing rows are handled at the database level.
	NotProvided,
	/// Stop: the user will add a default to the model by hand.
	ProvideManually,
}

pub trait MigrationQuestioner {
	/// Was `model_name.old_name` renamed to `model_name.new_name`?
	fn ask_rename(
		&self,
		model_name: &str,
		old_name: &str,
		new_name: &str,
		field: &FieldState,
	) -> Result<bool>;

	/// Was `old` renamed to `new`?
	fn ask_rename_model(&self, old: &ModelState, new: &ModelState) -> Result<bool>;

	/// Default for a new non-nullable field without one.
	fn ask_not_null_addition(&self, field_name: &str, model_name: &str) -> Result<DefaultAnswer>;

	/// Default for a field changing from nullable to non-nullable.
	fn ask_not_null_alteration(&self, field_name: &str, model_name: &str)
	-> Result<DefaultAnswer>;

	/// Default for a new `auto_now_add` field on existing rows.
	fn ask_auto_now_add_addition(
		&self,
		field_name: &str,
		model_name: &str,
	) -> Result<DefaultAnswer>;
}

/// Preset answers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionerDefaults {
	pub ask_rename: bool,
	pub ask_rename_model: bool,
	/// One-off default for new or newly non-null fields.
	pub not_null_default: Option<Value>,
	/// One-off default for new `auto_now_add` fields.
	pub auto_now_add_default: Option<Value>,
}

fn timezone_now() -> Value {
	Value::Callable("timezone.now".to_string())
}

/// Answers every question from [`QuestionerDefaults`].
#[derive(Debug, Clone, Default)]
pub struct DefaultQuestioner {
	defaults: QuestionerDefaults,
}

impl DefaultQuestioner {
	pub fn new(defaults: QuestionerDefaults) -> Self {
		Self { defaults }
	}

	/// Confirm every rename.
	pub fn accepting_renames() -> Self {
		Self::new(QuestionerDefaults {
			ask_rename: true,
			ask_rename_model: true,
			..QuestionerDefaults::default()
		})
	}

	fn not_null_default(&self) -> DefaultAnswer {
		self.defaults
			.not_null_default
			.clone()
			.map_or(DefaultAnswer::NotProvided, DefaultAnswer::Value)
	}
}

impl MigrationQuestioner for DefaultQuestioner {
	fn ask_rename(&self, _: &str, _: &str, _: &str, _: &FieldState) -> Result<bool> {
		Ok(self.defaults.ask_rename)
	}

	fn ask_rename_model(&self, _: &ModelState, _: &ModelState) -> Result<bool> {
		Ok(self.defaults.ask_rename_model)
	}

	fn ask_not_null_addition(&self, _: &str, _: &str) -> Result<DefaultAnswer> {
		Ok(self.not_null_default())
	}

	fn ask_not_null_alteration(&self, _: &str, _: &str) -> Result<DefaultAnswer> {
		Ok(self.not_null_default())
	}

	fn ask_auto_now_add_addition(&self, _: &str, _: &str) -> Result<DefaultAnswer> {
		Ok(DefaultAnswer::Value(
			self.defaults
				.auto_now_add_default
				.clone()
				.unwrap_or_else(timezone_now),
		))
	}
}

/// Headless questioner for CI.
///
/// Renames are never confirmed, so a rename shows up as a removal plus an
/// addition. Missing defaults are taken from the configured one; otherwise
/// they are left out (or, in strict mode, turned into a fatal error).
#[derive(Debug, Clone, Default)]
pub struct NonInteractiveQuestioner {
	defaults: QuestionerDefaults,
	strict: bool,
}

impl NonInteractiveQuestioner {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_defaults(mut self, defaults: QuestionerDefaults) -> Self {
		self.defaults = defaults;
		self
	}

	/// Refuse to continue when a default is needed and none is configured.
	pub fn strict(mut self, strict: bool) -> Self {
		self.strict = strict;
		self
	}

	fn missing_default(&self, what: &str, field_name: &str, model_name: &str) -> DefaultAnswer {
		if let Some(value) = &self.defaults.not_null_default {
			tracing::warn!(model = model_name, field = field_name, default = %value, "{what}: using configured default");
			return DefaultAnswer::Value(value.clone());
		}
		if self.strict {
			tracing::warn!(model = model_name, field = field_name, "{what}: no default available");
			DefaultAnswer::ProvideManually
		} else {
			tracing::warn!(
				model = model_name,
				field = field_name,
				"{what}: continuing without a default; existing rows must be handled manually"
			);
			DefaultAnswer::NotProvided
		}
	}
}

impl MigrationQuestioner for NonInteractiveQuestioner {
	fn ask_rename(&self, model_name: &str, old_name: &str, new_name: &str, _: &FieldState) -> Result<bool> {
		tracing::warn!(
			model = model_name,
			old = old_name,
			new = new_name,
			"possible field rename not confirmed in non-interactive mode"
		);
		Ok(false)
	}

	fn ask_rename_model(&self, old: &ModelState, new: &ModelState) -> Result<bool> {
		tracing::warn!(
			old = %old.key(),
			new = %new.key(),
			"possible model rename not confirmed in non-interactive mode"
		);
		Ok(false)
	}

	fn ask_not_null_addition(&self, field_name: &str, model_name: &str) -> Result<DefaultAnswer> {
		Ok(self.missing_default("non-nullable field added", field_name, model_name))
	}

	fn ask_not_null_alteration(&self, field_name: &str, model_name: &str) -> Result<DefaultAnswer> {
		Ok(self.missing_default("field made non-nullable", field_name, model_name))
	}

	fn ask_auto_now_add_addition(&self, field_name: &str, model_name: &str) -> Result<DefaultAnswer> {
		if let Some(value) = &self.defaults.auto_now_add_default {
			return Ok(DefaultAnswer::Value(value.clone()));
		}
		if self.strict {
			return Ok(DefaultAnswer::ProvideManually);
		}
		tracing::warn!(
			model = model_name,
			field = field_name,
			"auto_now_add field added: existing rows get timezone.now"
		);
		Ok(DefaultAnswer::Value(timezone_now()))
	}
}

#[cfg(feature = "interactive")]
pub use interactive::InteractiveQuestioner;

#[cfg(feature = "interactive")]
mod interactive {
	use super::{DefaultAnswer, MigrationQuestioner, timezone_now};
	use crate::deconstruct::Value;
	use crate::state::{FieldState, ModelState};
	use crate::{MigrationError, Result};
	use console::style;
	use dialoguer::theme::ColorfulTheme;
	use dialoguer::{Confirm, Input, Select};

	/// Terminal prompts.
	pub struct InteractiveQuestioner {
		theme: ColorfulTheme,
	}

	impl std::fmt::Debug for InteractiveQuestioner {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.debug_struct("InteractiveQuestioner")
				.field("theme", &"ColorfulTheme")
				.finish()
		}
	}

	impl Default for InteractiveQuestioner {
		fn default() -> Self {
			Self::new()
		}
	}

	fn prompt_error(err: dialoguer::Error) -> MigrationError {
		MigrationError::Questioner(err.to_string())
	}

	impl InteractiveQuestioner {
		pub fn new() -> Self {
			Self {
				theme: ColorfulTheme::default(),
			}
		}

		fn confirm(&self, prompt: String) -> Result<bool> {
			Confirm::with_theme(&self.theme)
				.with_prompt(prompt)
				.default(false)
				.interact()
				.map_err(prompt_error)
		}

		fn select(&self, prompt: String, items: &[&str]) -> Result<usize> {
			Select::with_theme(&self.theme)
				.with_prompt(prompt)
				.items(items)
				.default(0)
				.interact()
				.map_err(prompt_error)
		}

		/// Read a literal, accepting `timezone.now` as a callable.
		fn read_default(&self, suggestion: Option<&str>) -> Result<Value> {
			let mut input = Input::<String>::with_theme(&self.theme)
				.with_prompt("Default value (a literal such as 0, 'text', None, True)")
				.validate_with(|text: &String| -> std::result::Result<(), String> {
					if text.trim() == "timezone.now" || Value::parse_literal(text).is_some() {
						Ok(())
					} else {
						Err(format!("{text:?} is not a literal; quote strings"))
					}
				});
			if let Some(suggestion) = suggestion {
				input = input.default(suggestion.to_string());
			}
			let text = input.interact_text().map_err(prompt_error)?;
			if text.trim() == "timezone.now" {
				return Ok(timezone_now());
			}
			Value::parse_literal(&text)
				.ok_or_else(|| MigrationError::Questioner(format!("invalid default {text:?}")))
		}
	}

	impl MigrationQuestioner for InteractiveQuestioner {
		fn ask_rename(
			&self,
			model_name: &str,
			old_name: &str,
			new_name: &str,
			field: &FieldState,
		) -> Result<bool> {
			self.confirm(format!(
				"Was {}.{} renamed to {}.{} (a {})?",
				model_name,
				style(old_name).bold(),
				model_name,
				style(new_name).bold(),
				field.path
			))
		}

		fn ask_rename_model(&self, old: &ModelState, new: &ModelState) -> Result<bool> {
			self.confirm(format!(
				"Was the model {}.{} renamed to {}?",
				old.app_label,
				style(&old.name).bold(),
				style(&new.name).bold()
			))
		}

		fn ask_not_null_addition(&self, field_name: &str, model_name: &str) -> Result<DefaultAnswer> {
			let choice = self.select(
				format!(
					"It is impossible to add a non-nullable field '{field_name}' to {model_name} without specifying a default"
				),
				&[
					"Provide a one-off default now (will be set on all existing rows)",
					"Quit and manually define a default value in models",
				],
			)?;
			match choice {
				0 => self.read_default(None).map(DefaultAnswer::Value),
				_ => Ok(DefaultAnswer::ProvideManually),
			}
		}

		fn ask_not_null_alteration(&self, field_name: &str, model_name: &str) -> Result<DefaultAnswer> {
			let choice = self.select(
				format!(
					"It is impossible to change a nullable field '{field_name}' on {model_name} to non-nullable without providing a default"
				),
				&[
					"Provide a one-off default now (will be set on all existing rows with a null value)",
					"Ignore for now; existing rows that contain NULL values will have to be handled manually",
					"Quit and manually define a default value in models",
				],
			)?;
			match choice {
				0 => self.read_default(None).map(DefaultAnswer::Value),
				1 => Ok(DefaultAnswer::NotProvided),
				_ => Ok(DefaultAnswer::ProvideManually),
			}
		}

		fn ask_auto_now_add_addition(&self, field_name: &str, model_name: &str) -> Result<DefaultAnswer> {
			let choice = self.select(
				format!(
					"It is impossible to add the field '{field_name}' with 'auto_now_add=True' to {model_name} without providing a default"
				),
				&[
					"Provide a one-off default now which will be set on all existing rows",
					"Quit and manually define a default value in models",
				],
			)?;
			match choice {
				0 => self.read_default(Some("timezone.now")).map(DefaultAnswer::Value),
				_ => Ok(DefaultAnswer::ProvideManually),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_default_questioner_reads_presets() {
		let questioner = DefaultQuestioner::new(QuestionerDefaults {
			ask_rename: true,
			not_null_default: Some(Value::Int(0)),
			..QuestionerDefaults::default()
		});

		assert!(questioner.ask_rename("post", "a", "b", &FieldState::integer()).unwrap());
		assert!(!questioner
			.ask_rename_model(&ModelState::new("blog", "A"), &ModelState::new("blog", "B"))
			.unwrap());
		assert_eq!(
			questioner.ask_not_null_addition("views", "post").unwrap(),
			DefaultAnswer::Value(Value::Int(0))
		);
	}

	#[rstest]
	fn test_non_interactive_never_confirms_renames() {
		let questioner = NonInteractiveQuestioner::new().with_defaults(QuestionerDefaults {
			ask_rename: true,
			..QuestionerDefaults::default()
		});

		assert!(!questioner.ask_rename("post", "a", "b", &FieldState::integer()).unwrap());
	}

	#[rstest]
	#[case(false, DefaultAnswer::NotProvided)]
	#[case(true, DefaultAnswer::ProvideManually)]
	fn test_non_interactive_missing_default(#[case] strict: bool, #[case] expected: DefaultAnswer) {
		let questioner = NonInteractiveQuestioner::new().strict(strict);

		assert_eq!(questioner.ask_not_null_addition("views", "post").unwrap(), expected);
		assert_eq!(questioner.ask_not_null_alteration("views", "post").unwrap(), expected);
	}

	#[rstest]
	fn test_auto_now_add_defaults_to_timezone_now() {
		let questioner = NonInteractiveQuestioner::new();

		assert_eq!(
			questioner.ask_auto_now_add_addition("created", "post").unwrap(),
			DefaultAnswer::Value(Value::Callable("timezone.now".to_string()))
		);
	}
}
