//! Helper methods for turning search results into [`Identity`] records, and
//! for taking distinguished names apart.
use std::collections::{HashMap, HashSet};

use ldap3::SearchEntry;
use time::PrimitiveDateTime;
use tracing::warn;

use crate::{
	config::TIME_FORMAT,
	identity::{normalize, Identity, IdentityKind, Value},
};

/// Operational attribute holding the time an entry was last modified
pub const MODIFY_TIMESTAMP: &str = "modifytimestamp";
/// Attribute listing the object classes of an entry
pub const OBJECT_CLASS: &str = "objectclass";

/// Which attributes and values of an entry to keep when materializing it.
///
/// Attributes on the ignore list are dropped. For attributes with a match
/// configured, only values containing the match (without regard to case) are
/// kept, and the attribute is dropped if none does.
#[derive(Debug, Clone, Default)]
pub struct Projection {
	/// Normalized names of dropped attributes
	ignore: HashSet<String>,
	/// Lower-cased substrings by normalized attribute name
	matches: HashMap<String, String>,
}

impl Projection {
	/// Keep every attribute and value.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Drop an attribute.
	#[must_use]
	pub fn ignore(mut self, attribute: &str) -> Self {
		self.ignore.insert(normalize(attribute));
		self
	}

	/// Keep only values of the attribute containing the substring.
	#[must_use]
	pub fn matching(mut self, attribute: &str, substring: &str) -> Self {
		self.matches.insert(normalize(attribute), substring.to_lowercase());
		self
	}

	/// Whether the attribute is kept at all.
	fn keeps_attribute(&self, name: &str) -> bool {
		!self.ignore.contains(name)
	}

	/// Whether a textual value of the attribute is kept.
	fn keeps_value(&self, name: &str, value: &str) -> bool {
		self.matches.get(name).map_or(true, |substring| value.to_lowercase().contains(substring))
	}
}

/// An extension trait for [`SearchEntry`] that provides convenience methods for
/// extracting data.
pub trait SearchEntryExt {
	/// Materialize the entry as a record keyed by its distinguished name.
	///
	/// Textual values become [`Value::String`], values that are not valid
	/// UTF-8 become [`Value::Bytes`], and `modifyTimestamp` becomes a
	/// [`Value::Timestamp`]. The kind of the record is derived from
	/// `objectClass`.
	fn into_identity(self, projection: &Projection) -> Identity;
}

/// Look up a map entry without regard to the case of its key.
fn lookup<'a, V>(map: &'a HashMap<String, V>, name: &str) -> Option<&'a V> {
	map.get(name)
		.or_else(|| map.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, v)| v))
}

impl SearchEntryExt for SearchEntry {
	fn into_identity(self, projection: &Projection) -> Identity {
		let kind = IdentityKind::from_object_classes(
			lookup(&self.attrs, OBJECT_CLASS).into_iter().flatten().map(String::as_str),
		);
		let SearchEntry { dn, attrs, bin_attrs } = self;
		let mut identity = Identity::new(dn).with_kind(kind);

		for (name, values) in attrs {
			let name = normalize(&name);
			if !projection.keeps_attribute(&name) {
				continue;
			}
			let values: Vec<Value> = values
				.into_iter()
				.filter(|value| projection.keeps_value(&name, value))
				.map(|value| {
					if name == MODIFY_TIMESTAMP {
						parse_timestamp(value)
					} else {
						Value::String(value)
					}
				})
				.collect();
			identity.set_attribute_values(&name, values);
		}

		// Binary values cannot be matched against a substring
		for (name, values) in bin_attrs {
			let name = normalize(&name);
			if projection.keeps_attribute(&name) && !projection.matches.contains_key(&name) {
				identity.set_attribute_values(&name, values.into_iter().map(Value::Bytes));
			}
		}

		identity
	}
}

/// Parse a generalized time value, keeping it as a string if it does not
/// parse. Fractional seconds, as sent by Active Directory, are dropped.
fn parse_timestamp(value: String) -> Value {
	let whole = match value.split_once('.') {
		Some((seconds, _)) => format!("{seconds}Z"),
		None => value.clone(),
	};
	match PrimitiveDateTime::parse(&whole, &TIME_FORMAT) {
		Ok(time) => Value::Timestamp(time.assume_utc()),
		Err(err) => {
			warn!("Keeping unparsable {MODIFY_TIMESTAMP} `{value}` as text: {err}");
			Value::String(value)
		}
	}
}

/// Split a distinguished name into its relative name and its parent, at the
/// first comma that is not escaped.
#[must_use]
pub fn split_rdn(dn: &str) -> (&str, Option<&str>) {
	let mut escaped = false;
	for (index, c) in dn.char_indices() {
		match c {
			'\\' => escaped = !escaped,
			',' if !escaped => return (dn[..index].trim(), Some(dn[index + 1..].trim())),
			_ => escaped = false,
		}
	}
	(dn.trim(), None)
}

/// The name of `dn` relative to `root`, or its relative name if it is not
/// located below `root`.
#[must_use]
pub fn relative_name<'a>(dn: &'a str, root: &str) -> &'a str {
	if let Some(split) = dn.len().checked_sub(root.len() + 1) {
		if split > 0
			&& dn.is_char_boundary(split)
			&& dn.as_bytes()[split] == b','
			&& dn[split + 1..].eq_ignore_ascii_case(root)
		{
			return &dn[..split];
		}
	}
	split_rdn(dn).0
}

/// Whether two distinguished names are the same, without regard to case.
#[must_use]
pub fn same_dn(a: &str, b: &str) -> bool {
	a.trim().eq_ignore_ascii_case(b.trim())
}
