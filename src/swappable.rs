//! Swappable model settings
//!
//! Settings such as `AUTH_USER_MODEL` choose the concrete model behind a
//! relation at configuration time. Lookups are memoised per
//! [`SwappableSettings`] value; callers that change settings between runs in
//! one process call [`SwappableSettings::invalidate`] (or use
//! [`SwappableSettings::set`], which does it for them).

use crate::state::{ModelKey, Relation};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct SwappableSettings {
	settings: BTreeMap<String, String>,
	resolved: RwLock<HashMap<String, Option<ModelKey>>>,
}

impl Clone for SwappableSettings {
	fn clone(&self) -> Self {
		// Clones start with a cold cache.
		Self::from_settings(self.settings.clone())
	}
}

impl SwappableSettings {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build from a `SETTING -> "app_label.ModelName"` mapping.
	pub fn from_settings(settings: BTreeMap<String, String>) -> Self {
		Self {
			settings,
			resolved: RwLock::new(HashMap::new()),
		}
	}

	pub fn with_setting(mut self, name: impl Into<String>, model: impl Into<String>) -> Self {
		self.set(name, model);
		self
	}

	/// Change a setting and drop every memoised lookup.
	pub fn set(&mut self, name: impl Into<String>, model: impl Into<String>) {
		self.settings.insert(name.into(), model.into());
		self.invalidate();
	}

	/// Drop every memoised lookup.
	pub fn invalidate(&self) {
		self.resolved.write().clear();
	}

	/// Number of memoised lookups.
	pub fn cached_len(&self) -> usize {
		self.resolved.read().len()
	}

	/// Resolve a setting to the model it names, if configured and well formed.
	///
	/// # Example
	///
	/// ```rust
	/// use reinhardt_autodetector::{ModelKey, SwappableSettings};
	///
	/// let settings = SwappableSettings::new().with_setting("AUTH_USER_MODEL", "accounts.Member");
	/// assert_eq!(
	/// 	settings.resolve("AUTH_USER_MODEL"),
	/// 	Some(ModelKey::new("accounts", "member"))
	/// );
	/// assert_eq!(settings.resolve("UNKNOWN_MODEL"), None);
	/// ```
	pub fn resolve(&self, setting: &str) -> Option<ModelKey> {
		if let Some(hit) = self.resolved.read().get(setting) {
			return hit.clone();
		}
		let resolved = self.settings.get(setting).and_then(|value| match ModelKey::parse(value) {
			Ok(key) => Some(key),
			Err(err) => {
				tracing::warn!(setting, value = %value, error = %err, "ignoring malformed swappable setting");
				None
			}
		});
		self.resolved
			.write()
			.insert(setting.to_string(), resolved.clone());
		resolved
	}

	/// Concrete target of a relation: the swapped-in model when the relation
	/// is swappable and the setting is configured, otherwise its declared target.
	pub fn resolve_relation(&self, relation: &Relation) -> ModelKey {
		relation
			.swappable_setting
			.as_deref()
			.and_then(|setting| self.resolve(setting))
			.unwrap_or_else(|| relation.to.clone())
	}

	/// Whether `key` is the model currently selected by some setting.
	pub fn is_swapped_in(&self, key: &ModelKey) -> bool {
		self.settings
			.keys()
			.any(|setting| self.resolve(setting).as_ref() == Some(key))
	}

	pub fn settings(&self) -> &BTreeMap<String, String> {
		&self.settings
	}
}
