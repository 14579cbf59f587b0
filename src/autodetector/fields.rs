//! Field-level phases: renames, additions, removals and alterations

use super::{FieldRename, Generation, relation_dependencies};
use crate::dependency::{DependencyKind, OperationDependency};
use crate::operations::{AddField, AlterField, RemoveField, RenameField};
use crate::questioner::DefaultAnswer;
use crate::state::{FieldDefault, ModelKey};
use crate::{MigrationError, Result};
use tracing::debug;

impl<'a> Generation<'a> {
	/// Match every added field against removed fields of the same model.
	///
	/// A removed field is a rename candidate when it deconstructs the same
	/// (after following model renames), or the same once its old column is
	/// pinned with `db_column`. The questioner confirms each candidate; a
	/// field whose new name is exactly the old `db_column` is renamed
	/// without asking.
	pub(super) fn create_renamed_fields(&mut self) -> Result<()> {
		let to = self.to;
		let mut old_field_keys = self.old_field_keys.clone();
		let added: Vec<(ModelKey, String)> = self
			.new_field_keys
			.difference(&self.old_field_keys)
			.cloned()
			.collect();

		for (key, field_name) in added {
			let old_model = self.old_model(&key)?;
			let field = to.model(&key)?.get_field(&field_name)?;
			let candidates: Vec<String> = old_field_keys
				.difference(&self.new_field_keys)
				.filter(|(model, _)| *model == key)
				.map(|(_, name)| name.clone())
				.collect();

			for old_name in candidates {
				let old_field = old_model.get_field(&old_name)?;
				let forwarded = self.forward_field(old_field);

				let mut pinned = forwarded.clone();
				pinned.db_column = Some(forwarded.column(&old_name));
				let matches = forwarded == *field || pinned == *field;

				let mut unpinned = forwarded.clone();
				unpinned.db_column = None;
				let column_rename = old_field.db_column.as_deref() == Some(field_name.as_str())
					&& unpinned == *field;

				if !matches && !column_rename {
					continue;
				}
				if !column_rename
					&& !self
						.questioner
						.ask_rename(&key.model_name, &old_name, &field_name, field)?
				{
					continue;
				}

				debug!(model = %key, from = %old_name, to = %field_name, "field renamed");
				self.renamed_operations.push(FieldRename {
					key: key.clone(),
					old_name: old_name.clone(),
					old_db_column: old_field.db_column.clone(),
					new_name: field_name.clone(),
				});
				old_field_keys.remove(&(key.clone(), old_name.clone()));
				old_field_keys.insert((key.clone(), field_name.clone()));
				self.renamed_fields
					.insert((key.clone(), field_name.clone()), old_name);
				break;
			}
		}
		Ok(())
	}

	/// Emit the renames confirmed by [`Self::create_renamed_fields`].
	///
	/// When the column changes, an `AlterField` on the old name comes first
	/// so that the rename itself only touches the name.
	pub(super) fn generate_renamed_fields(&mut self) -> Result<()> {
		let to = self.to;
		for rename in std::mem::take(&mut self.renamed_operations) {
			let model = to.model(&rename.key)?;
			let field = model.get_field(&rename.new_name)?;
			let app_label = rename.key.app_label.as_str();
			if rename.old_db_column != field.db_column {
				self.add_operation(
					app_label,
					AlterField::new(&model.name, &rename.old_name, field.clone()),
					[],
				);
			}
			self.add_operation(
				app_label,
				RenameField::new(&model.name, &rename.old_name, &rename.new_name),
				[],
			);
			self.old_field_keys
				.remove(&(rename.key.clone(), rename.old_name.clone()));
			self.old_field_keys
				.insert((rename.key.clone(), rename.new_name.clone()));
		}
		Ok(())
	}

	pub(super) fn generate_removed_fields(&mut self) -> Result<()> {
		let removed: Vec<(ModelKey, String)> = self
			.old_field_keys
			.difference(&self.new_field_keys)
			.cloned()
			.collect();
		for (key, name) in removed {
			self.generate_removed_field(&key, &name)?;
		}
		Ok(())
	}

	/// A removal waits until no option of the model names the field any more.
	fn generate_removed_field(&mut self, key: &ModelKey, name: &str) -> Result<()> {
		let model = self.to.model(key)?;
		debug!(model = %key, field = name, "field removed");
		self.add_operation(
			&key.app_label,
			RemoveField::new(&model.name, name),
			[
				OperationDependency::new(key, Some(name), DependencyKind::RemoveOrderWrt),
				OperationDependency::new(key, Some(name), DependencyKind::AlterTogether),
				OperationDependency::new(key, Some(name), DependencyKind::RemoveIndexOrConstraint),
			],
		);
		Ok(())
	}

	pub(super) fn generate_added_fields(&mut self) -> Result<()> {
		let added: Vec<(ModelKey, String)> = self
			.new_field_keys
			.difference(&self.old_field_keys)
			.cloned()
			.collect();
		for (key, name) in added {
			self.generate_added_field(&key, &name)?;
		}
		Ok(())
	}

	/// Add a field to an existing model.
	///
	/// A column that is neither nullable nor defaulted needs a value for the
	/// existing rows; the questioner supplies a one-off default that is not
	/// kept on the field (`preserve_default = false`).
	fn generate_added_field(&mut self, key: &ModelKey, name: &str) -> Result<()> {
		let model = self.to.model(key)?;
		let mut field = model.get_field(name)?.clone();

		let mut dependencies = vec![OperationDependency::remove_field(key, name)];
		dependencies.extend(relation_dependencies(&field));
		if let Some(generated) = field.as_generated() {
			dependencies.extend(
				generated
					.references
					.iter()
					.map(|reference| OperationDependency::create_field(key, reference)),
			);
		}

		let preserve_default = field.null
			|| field.has_default()
			|| field.options.contains_key("db_default")
			|| field.is_many_to_many()
			|| field.as_generated().is_some()
			|| (field.blank && field.empty_strings_allowed())
			|| field.auto_now;
		if !preserve_default {
			let answer = if field.auto_now_add {
				self.questioner
					.ask_auto_now_add_addition(name, &key.model_name)?
			} else {
				self.questioner.ask_not_null_addition(name, &key.model_name)?
			};
			match answer {
				DefaultAnswer::Value(value) => field.default = FieldDefault::Value(value),
				DefaultAnswer::NotProvided => {}
				DefaultAnswer::ProvideManually => {
					return Err(MigrationError::DefaultRequired {
						model: key.to_string(),
						field: name.to_string(),
					});
				}
			}
		}

		debug!(model = %key, field = name, preserve_default, "field added");
		self.add_operation(
			&key.app_label,
			AddField::new(&model.name, name, field).with_preserve_default(preserve_default),
			dependencies,
		);
		Ok(())
	}

	/// Compare fields present on both sides.
	///
	/// Renamed fields are skipped: a confirmed rename may only have changed
	/// the column, which [`Self::generate_renamed_fields`] already handles.
	/// Switching between a many-to-many and a concrete field cannot be
	/// altered in place and becomes a removal followed by an addition.
	pub(super) fn generate_altered_fields(&mut self) -> Result<()> {
		let to = self.to;
		let kept: Vec<(ModelKey, String)> = self
			.old_field_keys
			.intersection(&self.new_field_keys)
			.cloned()
			.collect();

		for (key, name) in kept {
			let old_name = self.old_field_name(&key, &name);
			if old_name != name {
				continue;
			}
			let old_field = self.forward_field(self.old_model(&key)?.get_field(&old_name)?);
			let new_model = to.model(&key)?;
			let new_field = new_model.get_field(&name)?;
			if old_field == *new_field {
				continue;
			}

			if old_field.is_many_to_many() != new_field.is_many_to_many() {
				self.generate_removed_field(&key, &name)?;
				self.generate_added_field(&key, &name)?;
				continue;
			}

			let mut field = new_field.clone();
			let mut preserve_default = true;
			if old_field.null && !new_field.null && !new_field.has_default() && !new_field.is_many_to_many()
			{
				match self
					.questioner
					.ask_not_null_alteration(&name, &key.model_name)?
				{
					DefaultAnswer::Value(value) => {
						field.default = FieldDefault::Value(value);
						preserve_default = false;
					}
					DefaultAnswer::NotProvided => {}
					DefaultAnswer::ProvideManually => {
						return Err(MigrationError::DefaultRequired {
							model: key.to_string(),
							field: name,
						});
					}
				}
			}

			debug!(model = %key, field = %name, "field altered");
			self.add_operation(
				&key.app_label,
				AlterField::new(&new_model.name, &name, field).with_preserve_default(preserve_default),
				relation_dependencies(new_field),
			);
		}
		Ok(())
	}
}
