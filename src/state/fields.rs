//! Field descriptors

use super::ModelKey;
use crate::deconstruct::{Deconstructed, Deconstructible, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field types whose empty value is the empty string rather than NULL.
const STRING_FIELD_TYPES: &[&str] = &[
	"models.CharField",
	"models.TextField",
	"models.SlugField",
	"models.EmailField",
	"models.URLField",
	"models.FilePathField",
	"models.FileField",
	"models.ImageField",
	"models.GenericIPAddressField",
];

/// Default of a field: the "no default" sentinel is distinct from an explicit `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum FieldDefault {
	#[default]
	NotProvided,
	Value(Value),
}

impl FieldDefault {
	pub fn is_provided(&self) -> bool {
		matches!(self, Self::Value(_))
	}
}

/// Target of a relation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
	pub to: ModelKey,
	pub to_field: Option<String>,
	/// Deletion behaviour path, e.g. `models.CASCADE`. Unused for many-to-many.
	pub on_delete: Option<String>,
	pub related_name: Option<String>,
	/// Explicit join model of a many-to-many relation.
	pub through: Option<ModelKey>,
	/// Setting naming the swappable target, e.g. `AUTH_USER_MODEL`.
	pub swappable_setting: Option<String>,
	/// Multi-table inheritance link to the parent model.
	pub parent_link: bool,
}

impl Relation {
	fn new(to: ModelKey, on_delete: Option<&str>) -> Self {
		Self {
			to,
			to_field: None,
			on_delete: on_delete.map(str::to_string),
			related_name: None,
			through: None,
			swappable_setting: None,
			parent_link: false,
		}
	}
}

/// Database-computed column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSpec {
	pub expression: String,
	/// Names of the fields the expression reads.
	pub references: Vec<String>,
	pub output_field: Box<FieldState>,
	pub db_persist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldKind {
	Concrete,
	ForeignKey(Relation),
	OneToOne(Relation),
	ManyToMany(Relation),
	Generated(GeneratedSpec),
}

/// A field declaration as seen by the autodetector.
///
/// Equality is structural: two fields are equal iff their recursive
/// deconstructions are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldState {
	/// Qualified field type, e.g. `models.CharField`.
	pub path: String,
	pub kind: FieldKind,
	pub null: bool,
	pub blank: bool,
	pub editable: bool,
	pub primary_key: bool,
	pub unique: bool,
	pub default: FieldDefault,
	pub db_column: Option<String>,
	pub auto_now: bool,
	pub auto_now_add: bool,
	/// Remaining keyword arguments (`max_length`, `validators`, `choices`, ...).
	pub options: BTreeMap<String, Value>,
}

impl FieldState {
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			kind: FieldKind::Concrete,
			null: false,
			blank: false,
			editable: true,
			primary_key: false,
			unique: false,
			default: FieldDefault::NotProvided,
			db_column: None,
			auto_now: false,
			auto_now_add: false,
			options: BTreeMap::new(),
		}
	}

	pub fn auto() -> Self {
		Self::new("models.AutoField").primary_key()
	}

	pub fn big_auto() -> Self {
		Self::new("models.BigAutoField").primary_key()
	}

	pub fn char(max_length: u32) -> Self {
		Self::new("models.CharField").option("max_length", max_length)
	}

	pub fn text() -> Self {
		Self::new("models.TextField")
	}

	pub fn integer() -> Self {
		Self::new("models.IntegerField")
	}

	pub fn boolean() -> Self {
		Self::new("models.BooleanField")
	}

	pub fn date_time() -> Self {
		Self::new("models.DateTimeField")
	}

	pub fn foreign_key(to: impl Into<ModelKey>) -> Self {
		Self {
			kind: FieldKind::ForeignKey(Relation::new(to.into(), Some("models.CASCADE"))),
			..Self::new("models.ForeignKey")
		}
	}

	pub fn one_to_one(to: impl Into<ModelKey>) -> Self {
		Self {
			kind: FieldKind::OneToOne(Relation::new(to.into(), Some("models.CASCADE"))),
			..Self::new("models.OneToOneField")
		}
	}

	pub fn many_to_many(to: impl Into<ModelKey>) -> Self {
		Self {
			kind: FieldKind::ManyToMany(Relation::new(to.into(), None)),
			..Self::new("models.ManyToManyField")
		}
	}

	/// A generated column computed from `references` with the given output type.
	pub fn generated(
		expression: impl Into<String>,
		references: impl IntoIterator<Item = impl Into<String>>,
		output_field: FieldState,
	) -> Self {
		Self {
			kind: FieldKind::Generated(GeneratedSpec {
				expression: expression.into(),
				references: references.into_iter().map(Into::into).collect(),
				output_field: Box::new(output_field),
				db_persist: true,
			}),
			..Self::new("models.GeneratedField")
		}
	}

	pub fn null(mut self) -> Self {
		self.null = true;
		self
	}

	pub fn blank(mut self) -> Self {
		self.blank = true;
		self
	}

	pub fn not_editable(mut self) -> Self {
		self.editable = false;
		self
	}

	pub fn primary_key(mut self) -> Self {
		self.primary_key = true;
		self
	}

	pub fn unique(mut self) -> Self {
		self.unique = true;
		self
	}

	pub fn default(mut self, value: impl Into<Value>) -> Self {
		self.default = FieldDefault::Value(value.into());
		self
	}

	pub fn db_column(mut self, column: impl Into<String>) -> Self {
		self.db_column = Some(column.into());
		self
	}

	pub fn auto_now(mut self) -> Self {
		self.auto_now = true;
		self
	}

	pub fn auto_now_add(mut self) -> Self {
		self.auto_now_add = true;
		self
	}

	pub fn option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.options.insert(name.into(), value.into());
		self
	}

	pub fn through(self, through: impl Into<ModelKey>) -> Self {
		let through = through.into();
		self.map_relation(|rel| rel.through = Some(through))
	}

	pub fn to_field(self, to_field: impl Into<String>) -> Self {
		let to_field = to_field.into();
		self.map_relation(|rel| rel.to_field = Some(to_field))
	}

	pub fn related_name(self, related_name: impl Into<String>) -> Self {
		let related_name = related_name.into();
		self.map_relation(|rel| rel.related_name = Some(related_name))
	}

	pub fn on_delete(self, on_delete: impl Into<String>) -> Self {
		let on_delete = on_delete.into();
		self.map_relation(|rel| rel.on_delete = Some(on_delete))
	}

	/// Mark the relation target as chosen by a swappable setting.
	pub fn swappable(self, setting: impl Into<String>) -> Self {
		let setting = setting.into();
		self.map_relation(|rel| rel.swappable_setting = Some(setting))
	}

	pub fn parent_link(self) -> Self {
		self.map_relation(|rel| rel.parent_link = true)
	}

	fn map_relation(mut self, f: impl FnOnce(&mut Relation)) -> Self {
		if let Some(rel) = self.relation_mut() {
			f(rel);
		}
		self
	}

	pub fn relation(&self) -> Option<&Relation> {
		match &self.kind {
			FieldKind::ForeignKey(rel) | FieldKind::OneToOne(rel) | FieldKind::ManyToMany(rel) => {
				Some(rel)
			}
			FieldKind::Concrete | FieldKind::Generated(_) => None,
		}
	}

	pub fn relation_mut(&mut self) -> Option<&mut Relation> {
		match &mut self.kind {
			FieldKind::ForeignKey(rel) | FieldKind::OneToOne(rel) | FieldKind::ManyToMany(rel) => {
				Some(rel)
			}
			FieldKind::Concrete | FieldKind::Generated(_) => None,
		}
	}

	pub fn is_relation(&self) -> bool {
		self.relation().is_some()
	}

	pub fn is_many_to_many(&self) -> bool {
		matches!(self.kind, FieldKind::ManyToMany(_))
	}

	pub fn is_parent_link(&self) -> bool {
		self.relation().is_some_and(|rel| rel.parent_link)
	}

	pub fn as_generated(&self) -> Option<&GeneratedSpec> {
		match &self.kind {
			FieldKind::Generated(spec) => Some(spec),
			_ => None,
		}
	}

	pub fn has_default(&self) -> bool {
		self.default.is_provided()
	}

	pub fn empty_strings_allowed(&self) -> bool {
		STRING_FIELD_TYPES.contains(&self.path.as_str())
	}

	/// Column this field occupies when declared under `name`.
	pub fn column(&self, name: &str) -> String {
		if let Some(column) = &self.db_column {
			return column.clone();
		}
		match self.kind {
			FieldKind::ForeignKey(_) | FieldKind::OneToOne(_) => format!("{name}_id"),
			_ => name.to_string(),
		}
	}

	/// Deconstruction with the relation target removed, used to match
	/// renamed models whose relations may themselves point at renamed models.
	pub fn relation_agnostic_deconstruct(&self) -> Deconstructed {
		let mut dec = self.deconstruct();
		dec.kwargs.remove("to");
		dec
	}
}

impl Deconstructible for FieldState {
	fn deconstruct(&self) -> Deconstructed {
		let mut kwargs = self.options.clone();
		let mut flag = |name: &str, set: bool| {
			if set {
				kwargs.insert(name.to_string(), Value::Bool(true));
			}
		};
		flag("null", self.null);
		flag("blank", self.blank);
		flag("primary_key", self.primary_key);
		flag("unique", self.unique);
		flag("auto_now", self.auto_now);
		flag("auto_now_add", self.auto_now_add);
		if !self.editable {
			kwargs.insert("editable".to_string(), Value::Bool(false));
		}
		if let FieldDefault::Value(default) = &self.default {
			kwargs.insert("default".to_string(), default.clone());
		}
		if let Some(column) = &self.db_column {
			kwargs.insert("db_column".to_string(), Value::str(column.as_str()));
		}

		match &self.kind {
			FieldKind::Concrete => {}
			FieldKind::ForeignKey(rel) | FieldKind::OneToOne(rel) | FieldKind::ManyToMany(rel) => {
				kwargs.insert("to".to_string(), Value::str(rel.to.to_string()));
				if let Some(on_delete) = &rel.on_delete {
					kwargs.insert("on_delete".to_string(), Value::Path(on_delete.clone()));
				}
				if let Some(to_field) = &rel.to_field {
					kwargs.insert("to_field".to_string(), Value::str(to_field.as_str()));
				}
				if let Some(related_name) = &rel.related_name {
					kwargs.insert("related_name".to_string(), Value::str(related_name.as_str()));
				}
				if let Some(through) = &rel.through {
					kwargs.insert("through".to_string(), Value::str(through.to_string()));
				}
				if rel.parent_link {
					kwargs.insert("parent_link".to_string(), Value::Bool(true));
				}
			}
			FieldKind::Generated(spec) => {
				kwargs.insert("expression".to_string(), Value::str(spec.expression.as_str()));
				kwargs.insert(
					"output_field".to_string(),
					Value::object(spec.output_field.deconstruct()),
				);
				kwargs.insert("db_persist".to_string(), Value::Bool(spec.db_persist));
			}
		}

		Deconstructed {
			path: self.path.clone(),
			args: Vec::new(),
			kwargs,
		}
	}
}

impl PartialEq for FieldState {
	fn eq(&self, other: &Self) -> bool {
		self.deconstruct() == other.deconstruct()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_max_length_change_is_a_difference() {
		assert_ne!(FieldState::char(200), FieldState::char(400));
		assert_eq!(FieldState::char(200), FieldState::char(200));
	}

	#[rstest]
	fn test_explicit_none_default_differs_from_no_default() {
		let without = FieldState::integer().null();
		let with_none = FieldState::integer().null().default(Value::None);

		assert_ne!(without, with_none);
		assert!(with_none.has_default());
		assert!(!without.has_default());
	}

	#[rstest]
	fn test_relation_agnostic_deconstruct_ignores_target() {
		let a = FieldState::foreign_key(("shop", "Customer"));
		let b = FieldState::foreign_key(("shop", "Client"));

		assert_ne!(a, b);
		assert_eq!(a.relation_agnostic_deconstruct(), b.relation_agnostic_deconstruct());
	}

	#[rstest]
	#[case(FieldState::char(10), "title", "title")]
	#[case(FieldState::foreign_key(("shop", "Customer")), "owner", "owner_id")]
	#[case(FieldState::integer().db_column("legacy"), "count", "legacy")]
	fn test_column_name(#[case] field: FieldState, #[case] name: &str, #[case] expected: &str) {
		assert_eq!(field.column(name), expected);
	}

	#[rstest]
	fn test_generated_constructor_and_accessor() {
		let field = FieldState::generated("price * 2", ["price"], FieldState::integer());

		let generated = field.as_generated().unwrap();
		assert_eq!(generated.references, ["price"]);
		assert_eq!(*generated.output_field, FieldState::integer());
		assert!(FieldState::integer().as_generated().is_none());
	}

	#[rstest]
	fn test_builders_on_concrete_field_ignore_relation_options() {
		let field = FieldState::integer().through(("shop", "Membership"));

		assert!(field.relation().is_none());
	}
}
