//! Model options, indexes, constraints, managers and bases

use super::ModelKey;
use crate::deconstruct::{Deconstructed, Deconstructible, Value};
use crate::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Options that carry no dedicated operation and travel through `AlterModelOptions`.
pub const ALTER_OPTION_KEYS: &[&str] = &[
	"base_manager_name",
	"default_manager_name",
	"default_permissions",
	"default_related_name",
	"get_latest_by",
	"managed",
	"ordering",
	"permissions",
	"select_on_save",
	"verbose_name",
	"verbose_name_plural",
];

/// Implicit column added by `order_with_respect_to`.
pub const ORDER_COLUMN: &str = "_order";

/// A named index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexState {
	pub name: String,
	/// Field names, optionally prefixed with `-` for descending order.
	pub fields: Vec<String>,
	pub condition: Option<String>,
	pub include: Vec<String>,
}

impl IndexState {
	pub fn new(name: impl Into<String>, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			name: name.into(),
			fields: fields.into_iter().map(Into::into).collect(),
			condition: None,
			include: Vec::new(),
		}
	}

	pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
		self.condition = Some(condition.into());
		self
	}

	/// Field names without ordering prefixes, followed by covering fields.
	pub fn field_names(&self) -> impl Iterator<Item = &str> {
		self.fields
			.iter()
			.map(|f| f.trim_start_matches('-'))
			.chain(self.include.iter().map(String::as_str))
	}

	/// Equal in every respect except the name.
	pub fn same_definition(&self, other: &Self) -> bool {
		self.fields == other.fields
			&& self.condition == other.condition
			&& self.include == other.include
	}

	pub fn rename_field(&mut self, old: &str, new: &str) {
		for field in &mut self.fields {
			let descending = field.starts_with('-');
			if field.trim_start_matches('-') == old {
				*field = if descending {
					format!("-{new}")
				} else {
					new.to_string()
				};
			}
		}
		rename_in(&mut self.include, old, new);
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
	Check {
		condition: String,
		/// Fields the condition reads.
		references: Vec<String>,
	},
	Unique {
		fields: Vec<String>,
		condition: Option<String>,
	},
}

/// A named table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintState {
	pub name: String,
	pub kind: ConstraintKind,
}

impl ConstraintState {
	pub fn unique(name: impl Into<String>, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			name: name.into(),
			kind: ConstraintKind::Unique {
				fields: fields.into_iter().map(Into::into).collect(),
				condition: None,
			},
		}
	}

	pub fn check(
		name: impl Into<String>,
		condition: impl Into<String>,
		references: impl IntoIterator<Item = impl Into<String>>,
	) -> Self {
		Self {
			name: name.into(),
			kind: ConstraintKind::Check {
				condition: condition.into(),
				references: references.into_iter().map(Into::into).collect(),
			},
		}
	}

	pub fn field_names(&self) -> &[String] {
		match &self.kind {
			ConstraintKind::Check { references, .. } => references,
			ConstraintKind::Unique { fields, .. } => fields,
		}
	}

	pub fn rename_field(&mut self, old: &str, new: &str) {
		match &mut self.kind {
			ConstraintKind::Check { references, .. } => rename_in(references, old, new),
			ConstraintKind::Unique { fields, .. } => rename_in(fields, old, new),
		}
	}
}

fn rename_in(names: &mut [String], old: &str, new: &str) {
	for name in names.iter_mut().filter(|n| n.as_str() == old) {
		*name = new.to_string();
	}
}

/// A manager declaration, compared by deconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerState {
	pub path: String,
	pub args: Vec<Value>,
	pub kwargs: BTreeMap<String, Value>,
}

impl ManagerState {
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			args: Vec::new(),
			kwargs: BTreeMap::new(),
		}
	}

	pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.kwargs.insert(name.into(), value.into());
		self
	}
}

impl Deconstructible for ManagerState {
	fn deconstruct(&self) -> Deconstructed {
		Deconstructed {
			path: self.path.clone(),
			args: self.args.clone(),
			kwargs: self.kwargs.clone(),
		}
	}
}

/// A base class of a model: another model, or an external mixin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelBase {
	Model(ModelKey),
	External(String),
}

impl Default for ModelBase {
	fn default() -> Self {
		Self::External("models.Model".to_string())
	}
}

/// Declared `Meta` options of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
	pub managed: bool,
	pub proxy: bool,
	#[serde(rename = "abstract")]
	pub is_abstract: bool,
	pub swappable: Option<String>,
	pub db_table: Option<String>,
	pub db_table_comment: Option<String>,
	pub unique_together: BTreeSet<Vec<String>>,
	pub indexes: Vec<IndexState>,
	pub constraints: Vec<ConstraintState>,
	pub order_with_respect_to: Option<String>,
	pub default_related_name: Option<String>,
	pub permissions: Vec<(String, String)>,
	pub default_permissions: Option<Vec<String>>,
	pub verbose_name: Option<String>,
	pub verbose_name_plural: Option<String>,
	pub ordering: Vec<String>,
	pub get_latest_by: Option<String>,
	pub default_manager_name: Option<String>,
	pub base_manager_name: Option<String>,
	pub select_on_save: bool,
}

impl Default for ModelOptions {
	fn default() -> Self {
		Self {
			managed: true,
			proxy: false,
			is_abstract: false,
			swappable: None,
			db_table: None,
			db_table_comment: None,
			unique_together: BTreeSet::new(),
			indexes: Vec::new(),
			constraints: Vec::new(),
			order_with_respect_to: None,
			default_related_name: None,
			permissions: Vec::new(),
			default_permissions: None,
			verbose_name: None,
			verbose_name_plural: None,
			ordering: Vec::new(),
			get_latest_by: None,
			default_manager_name: None,
			base_manager_name: None,
			select_on_save: false,
		}
	}
}

impl ModelOptions {
	/// Build options from loosely typed values, as read from a model declaration.
	///
	/// Strings where a sequence is required are rejected rather than split
	/// into characters.
	///
	/// # Example
	///
	/// ```rust
	/// use std::collections::BTreeMap;
	/// use reinhardt_autodetector::{ModelOptions, Value};
	///
	/// let options = ModelOptions::from_values(BTreeMap::from([(
	/// 	"unique_together".to_string(),
	/// 	Value::Tuple(vec![Value::str("author"), Value::str("title")]),
	/// )]))
	/// .unwrap();
	/// assert!(options.unique_together.contains(&vec!["author".to_string(), "title".to_string()]));
	///
	/// let err = ModelOptions::from_values(BTreeMap::from([(
	/// 	"ordering".to_string(),
	/// 	Value::str("-created"),
	/// )]));
	/// assert!(err.is_err());
	/// ```
	pub fn from_values(values: BTreeMap<String, Value>) -> Result<Self> {
		let mut options = Self::default();
		for (key, value) in &values {
			options.set_value(key, value)?;
		}
		Ok(options)
	}

	/// Set one option from a loosely typed value.
	pub fn set_value(&mut self, key: &str, value: &Value) -> Result<()> {
		match key {
			"managed" => self.managed = expect_bool(key, value)?,
			"proxy" => self.proxy = expect_bool(key, value)?,
			"abstract" => self.is_abstract = expect_bool(key, value)?,
			"select_on_save" => self.select_on_save = expect_bool(key, value)?,
			"swappable" => self.swappable = expect_opt_str(key, value)?,
			"db_table" => self.db_table = expect_opt_str(key, value)?,
			"db_table_comment" => self.db_table_comment = expect_opt_str(key, value)?,
			"order_with_respect_to" => self.order_with_respect_to = expect_opt_str(key, value)?,
			"default_related_name" => self.default_related_name = expect_opt_str(key, value)?,
			"verbose_name" => self.verbose_name = expect_opt_str(key, value)?,
			"verbose_name_plural" => self.verbose_name_plural = expect_opt_str(key, value)?,
			"get_latest_by" => self.get_latest_by = expect_opt_str(key, value)?,
			"default_manager_name" => self.default_manager_name = expect_opt_str(key, value)?,
			"base_manager_name" => self.base_manager_name = expect_opt_str(key, value)?,
			"ordering" => self.ordering = expect_str_seq(key, value)?,
			"default_permissions" => self.default_permissions = Some(expect_str_seq(key, value)?),
			"unique_together" => self.unique_together = normalize_together(value)?,
			"permissions" => {
				self.permissions = expect_seq(key, value)?
					.iter()
					.map(|pair| -> Result<(String, String)> {
						let pair = expect_str_seq(key, pair)?;
						match <[String; 2]>::try_from(pair) {
							Ok([codename, name]) => Ok((codename, name)),
							Err(_) => Err(MigrationError::InvalidState(
								"permissions entries must be (codename, name) pairs".to_string(),
							)),
						}
					})
					.collect::<Result<Vec<_>>>()?;
			}
			other => {
				return Err(MigrationError::InvalidState(format!(
					"unsupported model option {other:?}"
				)));
			}
		}
		Ok(())
	}

	/// The subset of options compared and emitted by `AlterModelOptions`,
	/// containing only keys that differ from their defaults.
	pub fn alterable(&self) -> BTreeMap<String, Value> {
		let mut map = BTreeMap::new();
		let mut put = |key: &str, value: Option<Value>| {
			if let Some(value) = value {
				map.insert(key.to_string(), value);
			}
		};
		let strs = |items: &[String]| Value::List(items.iter().map(|s| Value::str(s.as_str())).collect());

		put("managed", (!self.managed).then_some(Value::Bool(false)));
		put("select_on_save", self.select_on_save.then_some(Value::Bool(true)));
		put("default_related_name", self.default_related_name.clone().map(Value::Str));
		put("verbose_name", self.verbose_name.clone().map(Value::Str));
		put("verbose_name_plural", self.verbose_name_plural.clone().map(Value::Str));
		put("get_latest_by", self.get_latest_by.clone().map(Value::Str));
		put("default_manager_name", self.default_manager_name.clone().map(Value::Str));
		put("base_manager_name", self.base_manager_name.clone().map(Value::Str));
		put("ordering", (!self.ordering.is_empty()).then(|| strs(&self.ordering)));
		put("default_permissions", self.default_permissions.as_deref().map(strs));
		put(
			"permissions",
			(!self.permissions.is_empty()).then(|| {
				Value::List(
					self.permissions
						.iter()
						.map(|(codename, name)| {
							Value::Tuple(vec![Value::str(codename.as_str()), Value::str(name.as_str())])
						})
						.collect(),
				)
			}),
		);
		map
	}

	/// Replace every alterable option with the given values; keys absent
	/// from `values` return to their defaults.
	pub fn apply_alterable(&mut self, values: &BTreeMap<String, Value>) -> Result<()> {
		let defaults = Self::default();
		self.managed = defaults.managed;
		self.select_on_save = defaults.select_on_save;
		self.default_related_name = None;
		self.verbose_name = None;
		self.verbose_name_plural = None;
		self.get_latest_by = None;
		self.default_manager_name = None;
		self.base_manager_name = None;
		self.ordering.clear();
		self.default_permissions = None;
		self.permissions.clear();
		for (key, value) in values {
			if !ALTER_OPTION_KEYS.contains(&key.as_str()) {
				return Err(MigrationError::InvalidState(format!(
					"{key:?} cannot be changed with AlterModelOptions"
				)));
			}
			self.set_value(key, value)?;
		}
		Ok(())
	}

	/// Rewrite every option that names `old` to name `new`.
	pub fn rename_field(&mut self, old: &str, new: &str) {
		self.unique_together = std::mem::take(&mut self.unique_together)
			.into_iter()
			.map(|mut fields| {
				rename_in(&mut fields, old, new);
				fields
			})
			.collect();
		for index in &mut self.indexes {
			index.rename_field(old, new);
		}
		for constraint in &mut self.constraints {
			constraint.rename_field(old, new);
		}
		if self.order_with_respect_to.as_deref() == Some(old) {
			self.order_with_respect_to = Some(new.to_string());
		}
	}

	/// Every field name referenced by `unique_together`, indexes,
	/// constraints and `order_with_respect_to`.
	pub fn referenced_fields(&self) -> BTreeSet<&str> {
		let mut names: BTreeSet<&str> = self
			.unique_together
			.iter()
			.flatten()
			.map(String::as_str)
			.collect();
		names.extend(self.indexes.iter().flat_map(IndexState::field_names));
		names.extend(
			self.constraints
				.iter()
				.flat_map(|c| c.field_names().iter().map(String::as_str)),
		);
		names.extend(self.order_with_respect_to.as_deref());
		names
	}

	/// Equal apart from the declaration order of indexes and constraints.
	pub fn is_equivalent(&self, other: &Self) -> bool {
		let normalized = |options: &Self| {
			let mut options = options.clone();
			options.indexes.sort_by(|a, b| a.name.cmp(&b.name));
			options.constraints.sort_by(|a, b| a.name.cmp(&b.name));
			options
		};
		normalized(self) == normalized(other)
	}
}

/// Normalize a `unique_together` value: a single tuple of names is wrapped
/// into a set of one tuple; a bare string is an error.
pub fn normalize_together(value: &Value) -> Result<BTreeSet<Vec<String>>> {
	let items = match value {
		Value::None => return Ok(BTreeSet::new()),
		Value::List(items) | Value::Tuple(items) => items,
		_ => {
			return Err(MigrationError::InvalidState(
				"unique_together must be a sequence of field-name sequences, not a string".to_string(),
			));
		}
	};
	if items.is_empty() {
		return Ok(BTreeSet::new());
	}
	if items.iter().all(|item| matches!(item, Value::Str(_))) {
		return Ok(BTreeSet::from([expect_str_seq("unique_together", value)?]));
	}
	items
		.iter()
		.map(|item| expect_str_seq("unique_together", item))
		.collect()
}

fn expect_bool(key: &str, value: &Value) -> Result<bool> {
	match value {
		Value::Bool(b) => Ok(*b),
		other => Err(MigrationError::InvalidState(format!(
			"option {key:?} must be a boolean, got {other}"
		))),
	}
}

fn expect_opt_str(key: &str, value: &Value) -> Result<Option<String>> {
	match value {
		Value::None => Ok(None),
		Value::Str(s) => Ok(Some(s.clone())),
		other => Err(MigrationError::InvalidState(format!(
			"option {key:?} must be a string, got {other}"
		))),
	}
}

fn expect_seq<'a>(key: &str, value: &'a Value) -> Result<&'a [Value]> {
	match value {
		Value::List(items) | Value::Tuple(items) => Ok(items),
		Value::Str(s) => Err(MigrationError::InvalidState(format!(
			"option {key:?} must be a sequence, not the string {s:?}"
		))),
		other => Err(MigrationError::InvalidState(format!(
			"option {key:?} must be a sequence, got {other}"
		))),
	}
}

fn expect_str_seq(key: &str, value: &Value) -> Result<Vec<String>> {
	expect_seq(key, value)?
		.iter()
		.map(|item| match item {
			Value::Str(s) => Ok(s.clone()),
			other => Err(MigrationError::InvalidState(format!(
				"option {key:?} must contain strings, got {other}"
			))),
		})
		.collect()
}
