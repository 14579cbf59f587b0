//! Model-level phases: renames, creation, deletion, proxies and table options

use super::{Generation, model_dependencies, relation_dependencies, targets_model};
use crate::deconstruct::Deconstructed;
use crate::dependency::{DependencyKind, OperationDependency};
use crate::operations::{
	AddConstraint, AddField, AddIndex, AlterField, AlterModelManagers, AlterModelOptions,
	AlterModelTable, AlterModelTableComment, AlterOrderWithRespectTo, AlterUniqueTogether,
	CreateModel, DeleteModel, RemoveField, RenameModel,
};
use crate::state::{ModelBase, ModelKey, ModelState, ORDER_COLUMN};
use crate::Result;
use std::collections::BTreeSet;
use tracing::debug;

/// External bases that mark a model as a user model.
const USER_MODEL_BASES: &[&str] = &["AbstractUser", "AbstractBaseUser"];

impl<'a> Generation<'a> {
	/// Pair every added model with a removed model of the same app whose
	/// fields match once relation targets are ignored, and ask whether it
	/// was renamed.
	pub(super) fn generate_renamed_models(&mut self) -> Result<()> {
		let (from, to) = (self.from, self.to);
		let added: Vec<ModelKey> = self
			.new_model_keys
			.difference(&self.old_model_keys)
			.cloned()
			.collect();

		for key in added {
			let model = to.model(&key)?;
			let fields_def = relation_agnostic_fields(model);
			let candidates: Vec<ModelKey> = self
				.old_model_keys
				.difference(&self.new_model_keys)
				.filter(|removed| removed.app_label == key.app_label)
				.cloned()
				.collect();

			for removed_key in candidates {
				let removed = from.model(&removed_key)?;
				if !same_multiset(&fields_def, &relation_agnostic_fields(removed)) {
					continue;
				}
				if !self.questioner.ask_rename_model(removed, model)? {
					continue;
				}

				let mut dependencies = model_dependencies(model);
				for (owner, _, _) in to.relations_to(&key) {
					dependencies.push(OperationDependency::create_model(&owner));
				}
				dependencies.retain(|dep| !targets_model(dep, &key));

				debug!(from = %removed_key, to = %key, "model renamed");
				self.add_operation(
					&removed_key.app_label,
					RenameModel::new(&removed.name, &model.name),
					dependencies,
				);
				self.renamed_models
					.insert(key.clone(), removed_key.model_name.clone());
				self.renamed_models_rel
					.insert(removed_key.clone(), key.clone());
				self.old_model_keys.remove(&removed_key);
				self.old_model_keys.insert(key.clone());
				break;
			}
		}
		Ok(())
	}

	/// Drop models that no longer exist.
	///
	/// Their `unique_together` and relation fields are removed first so that
	/// models pointing at each other can be dropped in any order.
	pub(super) fn generate_deleted_models(&mut self) -> Result<()> {
		let from = self.from;
		let new_keys: BTreeSet<ModelKey> = self
			.new_model_keys
			.union(&self.new_unmanaged_keys)
			.cloned()
			.collect();
		let deleted: Vec<ModelKey> = self
			.old_model_keys
			.difference(&new_keys)
			.chain(self.old_unmanaged_keys.difference(&new_keys))
			.cloned()
			.collect();

		for key in deleted {
			let model = from.model(&key)?;
			let mut related: Vec<&str> = model
				.fields
				.iter()
				.filter(|(_, field)| field.is_relation())
				.map(|(name, _)| name.as_str())
				.collect();
			related.sort_unstable();

			if !model.options.unique_together.is_empty() {
				self.add_operation(
					&key.app_label,
					AlterUniqueTogether::new(&model.name, BTreeSet::new()),
					[],
				);
			}
			for name in &related {
				self.add_operation(&key.app_label, RemoveField::new(&model.name, *name), []);
			}

			let mut dependencies = Vec::new();
			for (owner, field_name, field) in from.relations_to(&key) {
				let owner = self.new_key(&owner);
				dependencies.push(OperationDependency::remove_field(&owner, &field_name));
				if !field.is_many_to_many() {
					dependencies.push(OperationDependency::alter_field(&owner, &field_name));
				}
			}
			dependencies.extend(
				related
					.iter()
					.map(|name| OperationDependency::remove_field(&key, name)),
			);

			debug!(model = %key, "model deleted");
			self.add_operation(&key.app_label, DeleteModel::new(&model.name), dependencies);
		}
		Ok(())
	}

	/// Create new models.
	///
	/// Models whose relation targets already exist are created first. A
	/// relation to a model that is still pending is split out into an
	/// `AddField` after the `CreateModel`, together with any option that
	/// names it, so that models referencing each other can be created.
	pub(super) fn generate_created_models(&mut self) -> Result<()> {
		let to = self.to;
		let old_keys: BTreeSet<ModelKey> = self
			.old_model_keys
			.union(&self.old_unmanaged_keys)
			.cloned()
			.collect();
		let (mut queue, rest): (Vec<ModelKey>, Vec<ModelKey>) = self
			.new_model_keys
			.difference(&old_keys)
			.cloned()
			.partition(|key| self.is_swappable(key));
		queue.extend(rest);
		queue.extend(self.new_unmanaged_keys.difference(&old_keys).cloned());

		let mut pending: BTreeSet<ModelKey> = queue.iter().cloned().collect();
		pending.extend(self.new_proxy_keys.difference(&self.old_proxy_keys).cloned());

		while !queue.is_empty() {
			let ready = queue
				.iter()
				.position(|key| {
					to.get_model(key).is_some_and(|model| {
						self.relation_targets(model)
							.iter()
							.all(|target| target == key || !pending.contains(target))
					})
				})
				.unwrap_or(0);
			let key = queue.remove(ready);
			self.create_model(&key, &pending)?;
			pending.remove(&key);
		}
		Ok(())
	}

	fn create_model(&mut self, key: &ModelKey, pending: &BTreeSet<ModelKey>) -> Result<()> {
		let (from, to) = (self.from, self.to);
		let model = to.model(key)?;
		let app_label = key.app_label.as_str();
		let available = |target: &ModelKey| target == key || !pending.contains(target);

		let mut deferred: BTreeSet<&str> = BTreeSet::new();
		if model.options.managed {
			let names: Vec<&str> = model.fields.keys().map(String::as_str).collect();
			for (position, (name, field)) in model.fields.iter().enumerate() {
				if let Some(rel) = field.relation() {
					let inline_only = field.primary_key || rel.parent_link;
					let ready = available(&self.swappable.resolve_relation(rel))
						&& rel.through.as_ref().is_none_or(available);
					if !inline_only && !ready {
						deferred.insert(name.as_str());
					}
				}
				if let Some(generated) = field.as_generated() {
					let late = generated.references.iter().any(|reference| {
						deferred.contains(reference.as_str())
							|| names
								.iter()
								.position(|n| *n == reference.as_str())
								.is_none_or(|p| p > position)
					});
					if late {
						deferred.insert(name.as_str());
					}
				}
			}
		}

		// Options naming a deferred field move out of the CreateModel.
		let mut options = model.options.clone();
		let late_order = if options
			.order_with_respect_to
			.as_deref()
			.is_some_and(|f| deferred.contains(f))
		{
			options.order_with_respect_to.take()
		} else {
			None
		};
		let is_late =
			|name: &str| deferred.contains(name) || (late_order.is_some() && name == ORDER_COLUMN);
		let (late_indexes, indexes): (Vec<_>, Vec<_>) = std::mem::take(&mut options.indexes)
			.into_iter()
			.partition(|index| index.field_names().any(|f| is_late(f)));
		options.indexes = indexes;
		let (late_constraints, constraints): (Vec<_>, Vec<_>) =
			std::mem::take(&mut options.constraints)
				.into_iter()
				.partition(|constraint| constraint.field_names().iter().any(|f| is_late(f)));
		options.constraints = constraints;
		let late_together = if options.unique_together.iter().flatten().any(|f| is_late(f)) {
			std::mem::take(&mut options.unique_together)
		} else {
			BTreeSet::new()
		};

		let mut dependencies = vec![OperationDependency::remove_model(key)];
		for base in model.model_bases() {
			dependencies.push(OperationDependency::create_model(base));
			if let (Some(old_base), Some(new_base)) = (from.get_model(base), to.get_model(base)) {
				for name in old_base.fields.keys() {
					if !new_base.fields.contains_key(name) && model.fields.contains_key(name) {
						dependencies.push(OperationDependency::remove_field(base, name));
					}
				}
			}
		}
		for (name, field) in &model.fields {
			if !deferred.contains(name.as_str()) {
				dependencies.extend(
					relation_dependencies(field)
						.into_iter()
						.filter(|dep| !targets_model(dep, key)),
				);
			}
		}

		let inline_fields = model
			.fields
			.iter()
			.filter(|(name, _)| !deferred.contains(name.as_str()))
			.map(|(name, field)| (name.clone(), field.clone()))
			.collect();
		debug!(model = %key, deferred = ?deferred, "model created");
		self.add_operation_front(
			app_label,
			CreateModel::new(&model.name, inline_fields, options)
				.with_bases(model.bases.clone())
				.with_managers(model.managers.clone()),
			dependencies,
		);

		for (name, field) in &model.fields {
			if !deferred.contains(name.as_str()) {
				continue;
			}
			let mut dependencies = vec![OperationDependency::create_model(key)];
			dependencies.extend(relation_dependencies(field));
			if let Some(generated) = field.as_generated() {
				dependencies.extend(
					generated
						.references
						.iter()
						.map(|reference| OperationDependency::create_field(key, reference)),
				);
			}
			self.add_operation(app_label, AddField::new(&model.name, name, field.clone()), dependencies);
		}

		if let Some(order_with_respect_to) = late_order {
			let dependencies =
				late_dependencies(key, &deferred, [order_with_respect_to.as_str()]);
			self.add_operation(
				app_label,
				AlterOrderWithRespectTo::new(&model.name, Some(order_with_respect_to.clone())),
				dependencies,
			);
		}
		for index in late_indexes {
			let dependencies = late_dependencies(key, &deferred, index.field_names());
			self.add_operation(app_label, AddIndex::new(&model.name, index), dependencies);
		}
		for constraint in late_constraints {
			let dependencies = late_dependencies(
				key,
				&deferred,
				constraint.field_names().iter().map(String::as_str),
			);
			self.add_operation(app_label, AddConstraint::new(&model.name, constraint), dependencies);
		}
		if !late_together.is_empty() {
			let dependencies = late_dependencies(
				key,
				&deferred,
				late_together.iter().flatten().map(String::as_str),
			);
			self.add_operation(
				app_label,
				AlterUniqueTogether::new(&model.name, late_together),
				dependencies,
			);
		}

		// A proxy turned concrete: relations to it now point at a real table.
		if self.old_proxy_keys.contains(key) {
			for (owner, field_name, field) in to.relations_to(key) {
				let owner_model = to.model(&owner)?;
				self.add_operation(
					&owner.app_label,
					AlterField::new(&owner_model.name, field_name, field),
					[
						OperationDependency::create_model(key),
						OperationDependency::create_model(&owner),
					],
				);
			}
		}
		Ok(())
	}

	pub(super) fn generate_deleted_proxies(&mut self) -> Result<()> {
		let from = self.from;
		let deleted: Vec<ModelKey> = self
			.old_proxy_keys
			.difference(&self.new_proxy_keys)
			.cloned()
			.collect();
		for key in deleted {
			let model = from.model(&key)?;
			debug!(model = %key, "proxy deleted");
			self.add_operation(&key.app_label, DeleteModel::new(&model.name), []);
		}
		Ok(())
	}

	pub(super) fn generate_created_proxies(&mut self) -> Result<()> {
		let to = self.to;
		let added: Vec<ModelKey> = self
			.new_proxy_keys
			.difference(&self.old_proxy_keys)
			.cloned()
			.collect();
		for key in added {
			let model = to.model(&key)?;
			let mut dependencies = vec![OperationDependency::remove_model(&key)];
			dependencies.extend(model.model_bases().map(OperationDependency::create_model));
			debug!(model = %key, "proxy created");
			self.add_operation(
				&key.app_label,
				CreateModel::new(
					&model.name,
					model
						.fields
						.iter()
						.map(|(name, field)| (name.clone(), field.clone()))
						.collect(),
					model.options.clone(),
				)
				.with_bases(model.bases.clone())
				.with_managers(model.managers.clone()),
				dependencies,
			);
		}
		Ok(())
	}

	/// Compare options that travel through `AlterModelOptions`, including
	/// models switching between managed and unmanaged.
	pub(super) fn generate_altered_options(&mut self) -> Result<()> {
		let to = self.to;
		let mut keys: BTreeSet<ModelKey> = self
			.kept_model_keys
			.iter()
			.chain(&self.kept_proxy_keys)
			.chain(&self.kept_unmanaged_keys)
			.cloned()
			.collect();
		keys.extend(
			self.old_unmanaged_keys
				.intersection(&self.new_model_keys)
				.cloned(),
		);
		keys.extend(
			self.old_model_keys
				.intersection(&self.new_unmanaged_keys)
				.cloned(),
		);

		for key in keys {
			let old_options = self.old_model(&key)?.options.alterable();
			let new_model = to.model(&key)?;
			let new_options = new_model.options.alterable();
			if old_options != new_options {
				debug!(model = %key, "options altered");
				self.add_operation(
					&key.app_label,
					AlterModelOptions::new(&new_model.name, new_options),
					[],
				);
			}
		}
		Ok(())
	}

	pub(super) fn generate_altered_managers(&mut self) -> Result<()> {
		let to = self.to;
		for key in self.kept_model_keys.clone() {
			let old_model = self.old_model(&key)?;
			let new_model = to.model(&key)?;
			if old_model.managers != new_model.managers {
				debug!(model = %key, "managers altered");
				self.add_operation(
					&key.app_label,
					AlterModelManagers::new(&new_model.name, new_model.managers.clone()),
					[],
				);
			}
		}
		Ok(())
	}

	pub(super) fn generate_altered_db_table_comment(&mut self) -> Result<()> {
		let to = self.to;
		for key in self.kept_model_keys.clone() {
			let old_comment = &self.old_model(&key)?.options.db_table_comment;
			let new_model = to.model(&key)?;
			if *old_comment != new_model.options.db_table_comment {
				self.add_operation(
					&key.app_label,
					AlterModelTableComment::new(
						&new_model.name,
						new_model.options.db_table_comment.clone(),
					),
					[],
				);
			}
		}
		Ok(())
	}

	pub(super) fn generate_altered_db_table(&mut self) -> Result<()> {
		let to = self.to;
		for key in self.kept_model_keys.clone() {
			let old_table = &self.old_model(&key)?.options.db_table;
			let new_model = to.model(&key)?;
			if *old_table != new_model.options.db_table {
				debug!(model = %key, table = ?new_model.options.db_table, "table renamed");
				self.add_operation(
					&key.app_label,
					AlterModelTable::new(&new_model.name, new_model.options.db_table.clone()),
					[],
				);
			}
		}
		Ok(())
	}

	/// Models a new model must wait for before it can be created inline:
	/// relation targets, join models and model bases.
	fn relation_targets(&self, model: &ModelState) -> Vec<ModelKey> {
		let mut targets: Vec<ModelKey> = model.model_bases().cloned().collect();
		for field in model.fields.values() {
			if let Some(rel) = field.relation() {
				targets.push(self.swappable.resolve_relation(rel));
				targets.extend(rel.through.iter().cloned());
			}
		}
		targets
	}

	/// Swappable models and user models are created before anything else.
	fn is_swappable(&self, key: &ModelKey) -> bool {
		self.to.get_model(key).is_some_and(|model| {
			model.options.swappable.is_some()
				|| self.swappable.is_swapped_in(key)
				|| model.bases.iter().any(|base| {
					matches!(base, ModelBase::External(path)
						if USER_MODEL_BASES.iter().any(|name| path.ends_with(name)))
				})
		})
	}
}

/// Edges of an option split out of a `CreateModel`: the model itself and
/// every deferred field the option names.
fn late_dependencies<'n>(
	key: &ModelKey,
	deferred: &BTreeSet<&str>,
	names: impl IntoIterator<Item = &'n str>,
) -> Vec<OperationDependency> {
	let mut dependencies = vec![OperationDependency::create_model(key)];
	for name in names {
		if name == ORDER_COLUMN {
			dependencies.push(OperationDependency::new(key, None, DependencyKind::SetOrderWrt));
		} else if deferred.contains(name) {
			dependencies.push(OperationDependency::create_field(key, name));
		}
	}
	dependencies
}

/// Field deconstructions with relation targets dropped. Names are not
/// included: a renamed model may also have had fields renamed.
fn relation_agnostic_fields(model: &ModelState) -> Vec<Deconstructed> {
	model
		.fields
		.values()
		.map(|field| field.relation_agnostic_deconstruct())
		.collect()
}

/// Equal as multisets.
fn same_multiset(left: &[Deconstructed], right: &[Deconstructed]) -> bool {
	if left.len() != right.len() {
		return false;
	}
	let mut unmatched: Vec<&Deconstructed> = right.iter().collect();
	left.iter().all(|dec| match unmatched.iter().position(|other| *other == dec) {
		Some(i) => {
			unmatched.swap_remove(i);
			true
		}
		None => false,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::FieldState;
	use rstest::rstest;

	#[rstest]
	fn test_multiset_comparison_ignores_order() {
		let a = FieldState::char(10).relation_agnostic_deconstruct();
		let b = FieldState::integer().relation_agnostic_deconstruct();

		assert!(same_multiset(&[a.clone(), b.clone()], &[b.clone(), a.clone()]));
		assert!(!same_multiset(&[a.clone(), a.clone()], &[a, b]));
	}

	#[rstest]
	fn test_relation_agnostic_fields_ignore_targets_and_names() {
		let old = ModelState::new("shop", "Customer")
			.with_field("id", FieldState::auto())
			.with_field("owner", FieldState::foreign_key(("shop", "Person")));
		let new = ModelState::new("shop", "Client")
			.with_field("id", FieldState::auto())
			.with_field("owner", FieldState::foreign_key(("shop", "Human")));

		assert!(same_multiset(
			&relation_agnostic_fields(&old),
			&relation_agnostic_fields(&new)
		));
	}
}
