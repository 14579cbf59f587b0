//! Deconstruction protocol and structural equality
//!
//! Every value that can appear as a field argument, default, validator or
//! manager argument exposes a deconstructed form `(path, args, kwargs)`.
//! Change detection never compares values by identity: both sides are
//! recursively deconstructed into a [`CanonicalValue`] tree and the trees are
//! compared. Serialization goes through the same tree.
//!
//! # Example
//!
//! ```rust
//! use reinhardt_autodetector::deconstruct::{Deconstructed, Value};
//!
//! let a = Value::object(Deconstructed::new("validators.MaxLengthValidator").arg(Value::Int(10)));
//! let b = Value::object(Deconstructed::new("validators.MaxLengthValidator").arg(Value::Int(10)));
//! let c = Value::object(Deconstructed::new("validators.MaxLengthValidator").arg(Value::Int(20)));
//!
//! // Distinct instances with the same deconstruction are equal
//! assert_eq!(a, b);
//! assert_ne!(a, c);
//! ```

use crate::{MigrationError, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Capability of values that can be reduced to `(path, args, kwargs)`.
pub trait Deconstructible: fmt::Debug + Send + Sync {
	fn deconstruct(&self) -> Deconstructed;
}

/// A deconstructed value: qualified path plus positional and keyword arguments.
#[derive(Debug, Clone, Default)]
pub struct Deconstructed {
	pub path: String,
	pub args: Vec<Value>,
	pub kwargs: BTreeMap<String, Value>,
}

impl Deconstructed {
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			args: Vec::new(),
			kwargs: BTreeMap::new(),
		}
	}

	/// Append a positional argument.
	pub fn arg(mut self, value: impl Into<Value>) -> Self {
		self.args.push(value.into());
		self
	}

	/// Set a keyword argument.
	pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.kwargs.insert(name.into(), value.into());
		self
	}

	/// Recursively deconstruct every argument.
	pub fn canonical(&self) -> CanonicalValue {
		CanonicalValue::Object {
			path: self.path.clone(),
			args: self.args.iter().map(Value::deep_deconstruct).collect(),
			kwargs: self
				.kwargs
				.iter()
				.map(|(k, v)| (k.clone(), v.deep_deconstruct()))
				.collect(),
		}
	}
}

impl Deconstructible for Deconstructed {
	fn deconstruct(&self) -> Deconstructed {
		self.clone()
	}
}

impl PartialEq for Deconstructed {
	fn eq(&self, other: &Self) -> bool {
		self.canonical() == other.canonical()
	}
}

/// Flags understood by [`RegexPattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegexFlag {
	IgnoreCase,
	MultiLine,
	DotAll,
	Verbose,
}

impl RegexFlag {
	fn from_inline(c: char) -> Option<Self> {
		match c {
			'i' => Some(Self::IgnoreCase),
			'm' => Some(Self::MultiLine),
			's' => Some(Self::DotAll),
			'x' => Some(Self::Verbose),
			_ => None,
		}
	}
}

static INLINE_FLAGS: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"^\(\?([imsx]+)\)").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// A compiled-equivalent regular expression used by validators.
///
/// Leading inline flag groups are folded into the flag set, so patterns
/// that compile to the same matcher compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegexPattern {
	pattern: String,
	flags: BTreeSet<RegexFlag>,
}

impl RegexPattern {
	/// Normalize and validate a pattern.
	///
	/// # Example
	///
	/// ```rust
	/// use reinhardt_autodetector::deconstruct::{RegexFlag, RegexPattern};
	///
	/// let inline = RegexPattern::new("(?i)^[a-z]+$", []).unwrap();
	/// let flagged = RegexPattern::new("^[a-z]+$", [RegexFlag::IgnoreCase]).unwrap();
	/// assert_eq!(inline, flagged);
	/// ```
	pub fn new(pattern: &str, flags: impl IntoIterator<Item = RegexFlag>) -> Result<Self> {
		let normalized = Self::normalize(pattern, flags.into_iter().collect());
		normalized.compile()?;
		Ok(normalized)
	}

	fn normalize(pattern: &str, mut flags: BTreeSet<RegexFlag>) -> Self {
		let mut rest = pattern;
		while let Some(caps) = INLINE_FLAGS.captures(rest) {
			let (Some(whole), Some(letters)) = (caps.get(0), caps.get(1)) else {
				break;
			};
			flags.extend(letters.as_str().chars().filter_map(RegexFlag::from_inline));
			rest = &rest[whole.end()..];
		}
		Self {
			pattern: rest.to_string(),
			flags,
		}
	}

	pub fn pattern(&self) -> &str {
		&self.pattern
	}

	pub fn flags(&self) -> &BTreeSet<RegexFlag> {
		&self.flags
	}

	/// Build the matcher this pattern describes.
	pub fn compile(&self) -> Result<Regex> {
		RegexBuilder::new(&self.pattern)
			.case_insensitive(self.flags.contains(&RegexFlag::IgnoreCase))
			.multi_line(self.flags.contains(&RegexFlag::MultiLine))
			.dot_matches_new_line(self.flags.contains(&RegexFlag::DotAll))
			.ignore_whitespace(self.flags.contains(&RegexFlag::Verbose))
			.build()
			.map_err(|e| MigrationError::InvalidState(format!("invalid regex {:?}: {e}", self.pattern)))
	}
}

/// An argument or default value.
#[derive(Debug, Clone)]
pub enum Value {
	None,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	/// Reference to a class, constant or function, e.g. `models.CASCADE`.
	Path(String),
	/// Callable default evaluated at row creation, e.g. `timezone.now`.
	Callable(String),
	List(Vec<Value>),
	Tuple(Vec<Value>),
	Dict(BTreeMap<String, Value>),
	Regex(RegexPattern),
	Object(Arc<dyn Deconstructible>),
}

/// Fully deconstructed form of a [`Value`]; the unit of comparison and serialization.
///
/// Floats compare by bit pattern, so a NaN default equals itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CanonicalValue {
	None,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	Path(String),
	Callable(String),
	List(Vec<CanonicalValue>),
	Tuple(Vec<CanonicalValue>),
	Dict(BTreeMap<String, CanonicalValue>),
	Regex {
		pattern: String,
		flags: BTreeSet<RegexFlag>,
	},
	Object {
		path: String,
		args: Vec<CanonicalValue>,
		kwargs: BTreeMap<String, CanonicalValue>,
	},
}

impl PartialEq for CanonicalValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::None, Self::None) => true,
			(Self::Bool(a), Self::Bool(b)) => a == b,
			(Self::Int(a), Self::Int(b)) => a == b,
			(Self::Float(a), Self::Float(b)) => {
				a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
			}
			(Self::Str(a), Self::Str(b))
			| (Self::Path(a), Self::Path(b))
			| (Self::Callable(a), Self::Callable(b)) => a == b,
			(Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => a == b,
			(Self::Dict(a), Self::Dict(b)) => a == b,
			(
				Self::Regex {
					pattern: a,
					flags: a_flags,
				},
				Self::Regex {
					pattern: b,
					flags: b_flags,
				},
			) => a == b && a_flags == b_flags,
			(
				Self::Object {
					path: a,
					args: a_args,
					kwargs: a_kwargs,
				},
				Self::Object {
					path: b,
					args: b_args,
					kwargs: b_kwargs,
				},
			) => a == b && a_args == b_args && a_kwargs == b_kwargs,
			_ => false,
		}
	}
}

impl Value {
	pub fn str(value: impl Into<String>) -> Self {
		Self::Str(value.into())
	}

	pub fn object(value: impl Deconstructible + 'static) -> Self {
		Self::Object(Arc::new(value))
	}

	/// Replace every deconstructible value with its `(path, args, kwargs)`
	/// triple, recursing into containers.
	pub fn deep_deconstruct(&self) -> CanonicalValue {
		match self {
			Self::None => CanonicalValue::None,
			Self::Bool(b) => CanonicalValue::Bool(*b),
			Self::Int(i) => CanonicalValue::Int(*i),
			Self::Float(f) => CanonicalValue::Float(*f),
			Self::Str(s) => CanonicalValue::Str(s.clone()),
			Self::Path(p) => CanonicalValue::Path(p.clone()),
			Self::Callable(p) => CanonicalValue::Callable(p.clone()),
			Self::List(items) => CanonicalValue::List(items.iter().map(Self::deep_deconstruct).collect()),
			Self::Tuple(items) => {
				CanonicalValue::Tuple(items.iter().map(Self::deep_deconstruct).collect())
			}
			Self::Dict(map) => CanonicalValue::Dict(
				map.iter()
					.map(|(k, v)| (k.clone(), v.deep_deconstruct()))
					.collect(),
			),
			Self::Regex(re) => CanonicalValue::Regex {
				pattern: re.pattern.clone(),
				flags: re.flags.clone(),
			},
			Self::Object(obj) => obj.deconstruct().canonical(),
		}
	}

	/// Rebuild a value from its canonical form. Objects come back as plain
	/// [`Deconstructed`] values, which compare equal to the originals.
	pub fn from_canonical(canonical: CanonicalValue) -> Self {
		match canonical {
			CanonicalValue::None => Self::None,
			CanonicalValue::Bool(b) => Self::Bool(b),
			CanonicalValue::Int(i) => Self::Int(i),
			CanonicalValue::Float(f) => Self::Float(f),
			CanonicalValue::Str(s) => Self::Str(s),
			CanonicalValue::Path(p) => Self::Path(p),
			CanonicalValue::Callable(p) => Self::Callable(p),
			CanonicalValue::List(items) => Self::List(items.into_iter().map(Self::from_canonical).collect()),
			CanonicalValue::Tuple(items) => {
				Self::Tuple(items.into_iter().map(Self::from_canonical).collect())
			}
			CanonicalValue::Dict(map) => Self::Dict(
				map.into_iter()
					.map(|(k, v)| (k, Self::from_canonical(v)))
					.collect(),
			),
			CanonicalValue::Regex { pattern, flags } => {
				Self::Regex(RegexPattern::normalize(&pattern, flags))
			}
			CanonicalValue::Object { path, args, kwargs } => Self::object(Deconstructed {
				path,
				args: args.into_iter().map(Self::from_canonical).collect(),
				kwargs: kwargs
					.into_iter()
					.map(|(k, v)| (k, Self::from_canonical(v)))
					.collect(),
			}),
		}
	}

	/// Parse a literal typed at a prompt: `None`, `True`/`False`, integers,
	/// floats and quoted strings. Anything else is rejected.
	///
	/// # Example
	///
	/// ```rust
	/// use reinhardt_autodetector::deconstruct::Value;
	///
	/// assert_eq!(Value::parse_literal("42"), Some(Value::Int(42)));
	/// assert_eq!(Value::parse_literal("'draft'"), Some(Value::str("draft")));
	/// assert_eq!(Value::parse_literal("draft"), None);
	/// ```
	pub fn parse_literal(input: &str) -> Option<Self> {
		let input = input.trim();
		match input {
			"None" => return Some(Self::None),
			"True" => return Some(Self::Bool(true)),
			"False" => return Some(Self::Bool(false)),
			_ => {}
		}
		if let Ok(i) = input.parse::<i64>() {
			return Some(Self::Int(i));
		}
		if let Ok(f) = input.parse::<f64>() {
			return Some(Self::Float(f));
		}
		for quote in ['\'', '"'] {
			if input.len() >= 2 && input.starts_with(quote) && input.ends_with(quote) {
				return Some(Self::Str(input[1..input.len() - 1].to_string()));
			}
		}
		None
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn is_none(&self) -> bool {
		matches!(self, Self::None)
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		self.deep_deconstruct() == other.deep_deconstruct()
	}
}

impl Serialize for Value {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		self.deep_deconstruct().serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for Value {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		CanonicalValue::deserialize(deserializer).map(Self::from_canonical)
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fn join(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					write!(f, ", ")?;
				}
				write!(f, "{item}")?;
			}
			Ok(())
		}

		match self {
			Self::None => write!(f, "None"),
			Self::Bool(true) => write!(f, "True"),
			Self::Bool(false) => write!(f, "False"),
			Self::Int(i) => write!(f, "{i}"),
			Self::Float(x) => write!(f, "{x:?}"),
			Self::Str(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
			Self::Path(p) | Self::Callable(p) => write!(f, "{p}"),
			Self::List(items) => {
				write!(f, "[")?;
				join(f, items)?;
				write!(f, "]")
			}
			Self::Tuple(items) => {
				write!(f, "(")?;
				join(f, items)?;
				if items.len() == 1 {
					write!(f, ",")?;
				}
				write!(f, ")")
			}
			Self::Dict(map) => {
				write!(f, "{{")?;
				for (i, (k, v)) in map.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "'{k}': {v}")?;
				}
				write!(f, "}}")
			}
			Self::Regex(re) => write!(f, "re.compile({:?})", re.pattern),
			Self::Object(obj) => {
				let dec = obj.deconstruct();
				write!(f, "{}(", dec.path)?;
				join(f, &dec.args)?;
				for (i, (k, v)) in dec.kwargs.iter().enumerate() {
					if i > 0 || !dec.args.is_empty() {
						write!(f, ", ")?;
					}
					write!(f, "{k}={v}")?;
				}
				write!(f, ")")
			}
		}
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Self::Str(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Self::Str(value)
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Self::Int(i64::from(value))
	}
}

impl From<u32> for Value {
	fn from(value: u32) -> Self {
		Self::Int(i64::from(value))
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

impl From<RegexPattern> for Value {
	fn from(value: RegexPattern) -> Self {
		Self::Regex(value)
	}
}

impl From<Vec<Value>> for Value {
	fn from(value: Vec<Value>) -> Self {
		Self::List(value)
	}
}
