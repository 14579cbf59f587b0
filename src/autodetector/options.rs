//! Option phases: `unique_together`, `order_with_respect_to`, indexes and
//! constraints

use super::{
	AlteredConstraints, AlteredIndexes, Generation, field_reference_dependencies,
	model_dependencies, relation_dependencies,
};
use crate::dependency::OperationDependency;
use crate::operations::{
	AddConstraint, AddIndex, AlterOrderWithRespectTo, AlterUniqueTogether, RemoveConstraint,
	RemoveIndex, RenameIndex,
};
use crate::state::{ModelKey, ModelOptions};
use crate::Result;
use std::collections::BTreeSet;
use tracing::debug;

/// Marks a field name mid-translation so that swapped names do not collide.
const RENAME_MARKER: char = '\u{0}';

type Together = BTreeSet<Vec<String>>;

/// A `unique_together` that differs between the two states.
struct TogetherChange {
	key: ModelKey,
	model_name: String,
	/// Old value with field renames applied.
	old: Together,
	new: Together,
	dependencies: Vec<OperationDependency>,
}

impl TogetherChange {
	fn retained(&self) -> Together {
		self.old.intersection(&self.new).cloned().collect()
	}
}

impl<'a> Generation<'a> {
	/// Old options of `key` with every confirmed field rename applied.
	fn translated_options(&self, key: &ModelKey) -> Result<ModelOptions> {
		let mut options = self.old_model(key)?.options.clone();
		let renames: Vec<(&str, &str)> = self
			.renamed_fields
			.iter()
			.filter(|((model, _), _)| model == key)
			.map(|((_, new), old)| (old.as_str(), new.as_str()))
			.collect();
		for (old, new) in &renames {
			options.rename_field(old, &format!("{RENAME_MARKER}{new}"));
		}
		for (_, new) in &renames {
			options.rename_field(&format!("{RENAME_MARKER}{new}"), new);
		}
		Ok(options)
	}

	fn altered_unique_together(&self) -> Result<Vec<TogetherChange>> {
		let to = self.to;
		let mut changes = Vec::new();
		for key in &self.kept_model_keys {
			let old = self.translated_options(key)?.unique_together;
			let new_model = to.model(key)?;
			let new = new_model.options.unique_together.clone();
			if old == new {
				continue;
			}
			let mut dependencies = Vec::new();
			for name in new.iter().flatten() {
				dependencies.extend(relation_dependencies(new_model.get_field(name)?));
			}
			changes.push(TogetherChange {
				key: key.clone(),
				model_name: new_model.name.clone(),
				old,
				new,
				dependencies,
			});
		}
		Ok(changes)
	}

	/// Whether a tuple being dropped names a field that is removed or
	/// altered, so the constraint must go before the field changes.
	fn together_releases_field(&self, change: &TogetherChange) -> Result<bool> {
		let new_model = self.to.model(&change.key)?;
		let old_model = self.old_model(&change.key)?;
		for name in change.old.difference(&change.new).flatten() {
			let Some(new_field) = new_model.fields.get(name) else {
				return Ok(true);
			};
			let old_name = self.old_field_name(&change.key, name);
			let Some(old_field) = old_model.fields.get(&old_name) else {
				return Ok(true);
			};
			if self.forward_field(old_field) != *new_field {
				return Ok(true);
			}
		}
		Ok(false)
	}

	/// Drop `unique_together` tuples ahead of field changes.
	///
	/// Only the tuples kept on both sides are left in place. This step is
	/// skipped when nothing a dropped tuple names is changing; the final
	/// value is then set in one step by
	/// [`Self::generate_altered_unique_together`].
	pub(super) fn generate_removed_altered_unique_together(&mut self) -> Result<()> {
		for change in self.altered_unique_together()? {
			let retained = change.retained();
			if retained != change.new && !self.together_releases_field(&change)? {
				continue;
			}
			debug!(model = %change.key, "unique_together released");
			self.add_operation(
				&change.key.app_label,
				AlterUniqueTogether::new(&change.model_name, retained),
				change.dependencies,
			);
		}
		Ok(())
	}

	/// Set the final `unique_together` once every field it names exists.
	pub(super) fn generate_altered_unique_together(&mut self) -> Result<()> {
		for change in self.altered_unique_together()? {
			if change.retained() == change.new {
				continue;
			}
			let mut dependencies = field_reference_dependencies(
				&change.key,
				change.new.iter().flatten().map(String::as_str),
			);
			dependencies.extend(change.dependencies);
			debug!(model = %change.key, "unique_together altered");
			self.add_operation(
				&change.key.app_label,
				AlterUniqueTogether::new(&change.model_name, change.new),
				dependencies,
			);
		}
		Ok(())
	}

	pub(super) fn generate_altered_order_with_respect_to(&mut self) -> Result<()> {
		let to = self.to;
		for key in self.kept_model_keys.clone() {
			let old = self.translated_options(&key)?.order_with_respect_to;
			let new_model = to.model(&key)?;
			let new = new_model.options.order_with_respect_to.clone();
			if old == new {
				continue;
			}
			// Unsetting is ordered by the removal side; see RemoveOrderWrt.
			let dependencies: Vec<OperationDependency> = new
				.iter()
				.map(|field| OperationDependency::create_field(&key, field))
				.collect();
			debug!(model = %key, order_with_respect_to = ?new, "order_with_respect_to altered");
			self.add_operation(
				&key.app_label,
				AlterOrderWithRespectTo::new(&new_model.name, new),
				dependencies,
			);
		}
		Ok(())
	}

	/// Diff the indexes of every kept model. An added and a removed index
	/// that differ only by name become a rename.
	pub(super) fn create_altered_indexes(&mut self) -> Result<()> {
		let to = self.to;
		for key in self.kept_model_keys.clone() {
			let old_indexes = self.translated_options(&key)?.indexes;
			let new_indexes = &to.model(&key)?.options.indexes;

			let mut added: Vec<_> = new_indexes
				.iter()
				.filter(|index| !old_indexes.contains(index))
				.cloned()
				.collect();
			let mut removed: Vec<_> = old_indexes
				.iter()
				.filter(|index| !new_indexes.contains(index))
				.cloned()
				.collect();
			let mut renamed = Vec::new();
			added.retain(|new_index| {
				let matching = removed.iter().position(|old_index| {
					old_index.same_definition(new_index) && old_index.name != new_index.name
				});
				match matching {
					Some(i) => {
						let old_index = removed.remove(i);
						renamed.push((old_index.name, new_index.name.clone()));
						false
					}
					None => true,
				}
			});

			if !(added.is_empty() && removed.is_empty() && renamed.is_empty()) {
				self.altered_indexes.insert(
					key,
					AlteredIndexes {
						added,
						removed,
						renamed,
					},
				);
			}
		}
		Ok(())
	}

	pub(super) fn create_altered_constraints(&mut self) -> Result<()> {
		let to = self.to;
		for key in self.kept_model_keys.clone() {
			let old_constraints = self.translated_options(&key)?.constraints;
			let new_constraints = &to.model(&key)?.options.constraints;
			let added: Vec<_> = new_constraints
				.iter()
				.filter(|constraint| !old_constraints.contains(constraint))
				.cloned()
				.collect();
			let removed: Vec<_> = old_constraints
				.iter()
				.filter(|constraint| !new_constraints.contains(constraint))
				.cloned()
				.collect();
			if !(added.is_empty() && removed.is_empty()) {
				self.altered_constraints
					.insert(key, AlteredConstraints { added, removed });
			}
		}
		Ok(())
	}

	pub(super) fn generate_removed_indexes(&mut self) -> Result<()> {
		let to = self.to;
		for (key, altered) in self.altered_indexes.clone() {
			let model = to.model(&key)?;
			for index in altered.removed {
				debug!(model = %key, index = %index.name, "index removed");
				self.add_operation(&key.app_label, RemoveIndex::new(&model.name, index.name), []);
			}
		}
		Ok(())
	}

	pub(super) fn generate_renamed_indexes(&mut self) -> Result<()> {
		let to = self.to;
		for (key, altered) in self.altered_indexes.clone() {
			let model = to.model(&key)?;
			for (old_name, new_name) in altered.renamed {
				debug!(model = %key, from = %old_name, to = %new_name, "index renamed");
				self.add_operation(
					&key.app_label,
					RenameIndex::new(&model.name, old_name, new_name),
					[],
				);
			}
		}
		Ok(())
	}

	pub(super) fn generate_added_indexes(&mut self) -> Result<()> {
		let to = self.to;
		for (key, altered) in self.altered_indexes.clone() {
			let model = to.model(&key)?;
			for index in altered.added {
				let mut dependencies = model_dependencies(model);
				dependencies.extend(field_reference_dependencies(&key, index.field_names()));
				debug!(model = %key, index = %index.name, "index added");
				self.add_operation(&key.app_label, AddIndex::new(&model.name, index), dependencies);
			}
		}
		Ok(())
	}

	pub(super) fn generate_removed_constraints(&mut self) -> Result<()> {
		let to = self.to;
		for (key, altered) in self.altered_constraints.clone() {
			let model = to.model(&key)?;
			for constraint in altered.removed {
				debug!(model = %key, constraint = %constraint.name, "constraint removed");
				self.add_operation(
					&key.app_label,
					RemoveConstraint::new(&model.name, constraint.name),
					[],
				);
			}
		}
		Ok(())
	}

	pub(super) fn generate_added_constraints(&mut self) -> Result<()> {
		let to = self.to;
		for (key, altered) in self.altered_constraints.clone() {
			let model = to.model(&key)?;
			for constraint in altered.added {
				let mut dependencies = model_dependencies(model);
				dependencies.extend(field_reference_dependencies(
					&key,
					constraint.field_names().iter().map(String::as_str),
				));
				debug!(model = %key, constraint = %constraint.name, "constraint added");
				self.add_operation(
					&key.app_label,
					AddConstraint::new(&model.name, constraint),
					dependencies,
				);
			}
		}
		Ok(())
	}
}
