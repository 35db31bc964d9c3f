//! Identity records: a case-insensitive, multi-valued attribute bag keyed by
//! the unique identifier (usually the distinguished name) of an entry.
use std::{collections::BTreeMap, fmt};

use time::{OffsetDateTime, UtcOffset};

use crate::{config::TIME_FORMAT, error::Error};

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	/// Textual value
	String(String),
	/// Binary value, e.g. a photo, a certificate or an encoded password
	Bytes(Vec<u8>),
	/// Point in time, written to the directory as generalized time
	Timestamp(OffsetDateTime),
	/// Reference to another record, written to the directory as its
	/// identifier
	Identity(Box<Identity>),
}

impl Value {
	/// The value as a string slice, if it is textual.
	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(value) => Some(value),
			_ => None,
		}
	}

	/// Whether two values are equal, comparing textual values without regard
	/// to case. Values of different kinds are compared by their wire form, so
	/// a reference or a timestamp matches the string read back from the
	/// directory.
	#[must_use]
	pub fn matches(&self, other: &Value) -> bool {
		match (self, other) {
			(Value::String(a), Value::String(b)) => eq_ignore_case(a, b),
			_ if self == other => true,
			_ => match (self.encode(), other.encode()) {
				(Ok(a), Ok(b)) => match (std::str::from_utf8(&a), std::str::from_utf8(&b)) {
					(Ok(a), Ok(b)) => eq_ignore_case(a, b),
					_ => a == b,
				},
				_ => false,
			},
		}
	}

	/// Encode the value the way it is transferred to the directory server.
	pub fn encode(&self) -> Result<Vec<u8>, Error> {
		match self {
			Value::String(value) => Ok(value.as_bytes().to_vec()),
			Value::Bytes(value) => Ok(value.clone()),
			Value::Timestamp(time) => time
				.to_offset(UtcOffset::UTC)
				.format(&TIME_FORMAT)
				.map(String::into_bytes)
				.map_err(|err| Error::InvalidArgument(format!("unencodable timestamp: {err}"))),
			Value::Identity(identity) => Ok(identity.id().as_bytes().to_vec()),
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::String(value) => f.write_str(value),
			Value::Bytes(bytes) => bytes.iter().try_for_each(|byte| write!(f, "{byte:02x}")),
			Value::Timestamp(time) => match time.to_offset(UtcOffset::UTC).format(&TIME_FORMAT) {
				Ok(formatted) => f.write_str(&formatted),
				Err(_) => write!(f, "{time}"),
			},
			Value::Identity(identity) => f.write_str(identity.id()),
		}
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::String(value.to_owned())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::String(value)
	}
}

impl From<Vec<u8>> for Value {
	fn from(value: Vec<u8>) -> Self {
		Value::Bytes(value)
	}
}

impl From<&[u8]> for Value {
	fn from(value: &[u8]) -> Self {
		Value::Bytes(value.to_vec())
	}
}

impl From<OffsetDateTime> for Value {
	fn from(value: OffsetDateTime) -> Self {
		Value::Timestamp(value)
	}
}

impl From<Identity> for Value {
	fn from(value: Identity) -> Self {
		Value::Identity(Box::new(value))
	}
}

/// What kind of directory object a record describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentityKind {
	/// A person or account
	User,
	/// A group of other entries
	Group,
	/// Any other entry, such as an organizational unit
	#[default]
	Entry,
}

impl IdentityKind {
	/// Derive the kind from the values of an entry's `objectClass` attribute.
	pub fn from_object_classes<'a>(classes: impl IntoIterator<Item = &'a str>) -> Self {
		let mut kind = IdentityKind::Entry;
		for class in classes {
			match class.to_lowercase().as_str() {
				"user" | "person" | "inetorgperson" | "organizationalperson" | "posixaccount" => {
					return IdentityKind::User
				}
				"group" | "groupofnames" | "groupofuniquenames" | "posixgroup" => {
					kind = IdentityKind::Group;
				}
				_ => {}
			}
		}
		kind
	}
}

/// Normalized form of an attribute name.
pub(crate) fn normalize(name: &str) -> String {
	name.trim().to_lowercase()
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
	a == b || a.to_lowercase() == b.to_lowercase()
}

/// An entry of a directory, or the desired state of one.
///
/// Attribute names are normalized (trimmed and lower-cased) on every access,
/// and every attribute holds a non-empty list of values, even when it is
/// single valued.
#[derive(Debug, Clone, Default)]
pub struct Identity {
	/// Unique identifier of the record
	id: String,
	/// Kind of object
	kind: IdentityKind,
	/// Attribute values keyed by normalized name
	attributes: BTreeMap<String, Vec<Value>>,
}

impl Identity {
	/// Create an empty record with the given identifier.
	#[must_use]
	pub fn new(id: impl Into<String>) -> Self {
		Self { id: id.into(), kind: IdentityKind::default(), attributes: BTreeMap::new() }
	}

	/// Set the kind of the record.
	#[must_use]
	pub fn with_kind(mut self, kind: IdentityKind) -> Self {
		self.kind = kind;
		self
	}

	/// The unique identifier of the record.
	#[must_use]
	pub fn id(&self) -> &str {
		&self.id
	}

	/// The kind of the record.
	#[must_use]
	pub fn kind(&self) -> IdentityKind {
		self.kind
	}

	/// Set a single-valued attribute, replacing any previous values.
	pub fn set_attribute(&mut self, name: &str, value: impl Into<Value>) {
		self.set_attribute_values(name, [value]);
	}

	/// Set a multi-valued attribute, replacing any previous values. Setting an
	/// empty list removes the attribute.
	pub fn set_attribute_values<V: Into<Value>>(
		&mut self,
		name: &str,
		values: impl IntoIterator<Item = V>,
	) {
		let name = normalize(name);
		if name.is_empty() {
			return;
		}
		let values: Vec<Value> = values.into_iter().map(Into::into).collect();
		if values.is_empty() {
			self.attributes.remove(&name);
		} else {
			self.attributes.insert(name, values);
		}
	}

	/// The values of an attribute, if present.
	#[must_use]
	pub fn attribute(&self, name: &str) -> Option<&[Value]> {
		self.attributes.get(&normalize(name)).map(Vec::as_slice)
	}

	/// The first value of an attribute, if present.
	#[must_use]
	pub fn first_value(&self, name: &str) -> Option<&Value> {
		self.attribute(name)?.first()
	}

	/// The first value of an attribute if it is textual.
	#[must_use]
	pub fn first_str(&self, name: &str) -> Option<&str> {
		self.first_value(name)?.as_str()
	}

	/// Whether the attribute is present.
	#[must_use]
	pub fn has_attribute(&self, name: &str) -> bool {
		self.attributes.contains_key(&normalize(name))
	}

	/// Whether the attribute holds the value. Textual values are also matched
	/// without regard to case.
	pub fn has_attribute_value(&self, name: &str, value: impl Into<Value>) -> bool {
		let value = value.into();
		self.attribute(name).is_some_and(|values| values.iter().any(|v| v.matches(&value)))
	}

	/// Remove an attribute, returning its values.
	pub fn remove_attribute(&mut self, name: &str) -> Option<Vec<Value>> {
		self.attributes.remove(&normalize(name))
	}

	/// Names of all attributes, in normalized form.
	pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
		self.attributes.keys().map(String::as_str)
	}

	/// All attributes keyed by normalized name.
	#[must_use]
	pub fn attributes(&self) -> &BTreeMap<String, Vec<Value>> {
		&self.attributes
	}

	/// Consume the record, returning its attributes.
	#[must_use]
	pub fn into_attributes(self) -> BTreeMap<String, Vec<Value>> {
		self.attributes
	}
}

/// Records are the same record when their identifiers are equal.
impl PartialEq for Identity {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "EntryID: {}", self.id)?;
		for (name, values) in &self.attributes {
			write!(f, "{name}: ")?;
			for (index, value) in values.iter().enumerate() {
				if index > 0 {
					f.write_str(",")?;
				}
				write!(f, "{value}")?;
			}
			writeln!(f)?;
		}
		Ok(())
	}
}
