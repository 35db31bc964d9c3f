//! In-memory directory used by unit tests.
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};

use ldap3::{LdapError, LdapResult, SearchEntry};

use crate::{
	config::{SearchScope, UNLIMITED},
	entry::split_rdn,
	error::Error,
	identity::Value,
	session::{AccessMode, Directory, Modification, SearchRequest},
};

/// A stored entry.
#[derive(Debug, Clone)]
struct Stored {
	/// Name as given when the entry was created
	dn: String,
	/// Values by lower-cased attribute name, with the name as given
	attributes: BTreeMap<String, (String, Vec<Vec<u8>>)>,
}

/// A directory keeping its entries in memory, evaluating the filters produced
/// by [`crate::filter`] and recording every request.
#[derive(Debug, Default)]
pub(crate) struct MemoryDirectory {
	/// Entries by lower-cased name
	entries: BTreeMap<String, Stored>,
	/// Whether a connection is open
	connected: bool,
	/// Number of connections opened
	pub connects: usize,
	/// Mode of the last connection
	pub mode: Option<AccessMode>,
	/// Scope reported to readers
	pub scope: SearchScope,
	/// Count limit reported to readers
	pub count_limit: Option<i32>,
	/// Modifications touching this attribute are rejected
	pub reject: Option<String>,
	/// Every search request
	searches: Vec<SearchRequest>,
	/// Every applied modify request
	modifications: Vec<(String, Vec<Modification>)>,
	/// Names of deleted entries, in order
	pub deleted: Vec<String>,
}

/// Normalized form of a distinguished name.
fn key(dn: &str) -> String {
	dn.trim().to_lowercase()
}

/// A failed operation as reported by a server.
fn server_error(rc: u32, text: &str) -> Error {
	Error::Ldap(LdapError::LdapResult {
		result: LdapResult {
			rc,
			matched: String::new(),
			text: text.to_owned(),
			refs: Vec::new(),
			ctrls: Vec::new(),
		},
	})
}

impl MemoryDirectory {
	/// Store an entry. Repeated attribute names add values.
	pub fn insert<'a>(&mut self, dn: &str, attributes: impl IntoIterator<Item = (&'a str, &'a str)>) {
		let mut stored = Stored { dn: dn.to_owned(), attributes: BTreeMap::new() };
		for (name, value) in attributes {
			stored
				.attributes
				.entry(name.to_lowercase())
				.or_insert_with(|| (name.to_owned(), Vec::new()))
				.1
				.push(value.as_bytes().to_vec());
		}
		self.entries.insert(key(dn), stored);
	}

	/// Whether the entry exists.
	pub fn contains(&self, dn: &str) -> bool {
		self.entries.contains_key(&key(dn))
	}

	/// Raw values of an attribute.
	pub fn raw_values(&self, dn: &str, attribute: &str) -> Option<&[Vec<u8>]> {
		let stored = self.entries.get(&key(dn))?;
		stored.attributes.get(&attribute.to_lowercase()).map(|(_, values)| values.as_slice())
	}

	/// Values of an attribute as text.
	pub fn values(&self, dn: &str, attribute: &str) -> Option<Vec<String>> {
		self.raw_values(dn, attribute).map(|values| {
			values.iter().map(|value| String::from_utf8_lossy(value).into_owned()).collect()
		})
	}

	/// Whether a connection is open.
	pub fn is_connected(&self) -> bool {
		self.connected
	}

	/// Every search request so far.
	pub fn searches(&self) -> &[SearchRequest] {
		&self.searches
	}

	/// Every applied modify request so far.
	pub fn modifications(&self) -> &[(String, Vec<Modification>)] {
		&self.modifications
	}

	/// Forget recorded requests.
	pub fn clear_log(&mut self) {
		self.searches.clear();
		self.modifications.clear();
		self.deleted.clear();
	}

	/// Open a connection if none is open.
	fn ensure_connected(&mut self, mode: AccessMode) {
		if !self.connected {
			self.connected = true;
			self.connects += 1;
			self.mode = Some(mode);
		}
	}
}

/// Whether an entry is within the scope of a search.
fn in_scope(entry: &str, base: &str, scope: SearchScope) -> bool {
	match scope {
		SearchScope::Object => entry == base,
		SearchScope::OneLevel => split_rdn(entry).1.unwrap_or_default() == base && entry != base,
		SearchScope::Subtree => {
			base.is_empty() || entry == base || entry.ends_with(&format!(",{base}"))
		}
	}
}

impl Stored {
	/// Convert into a search result with the requested attributes.
	fn project(&self, requested: &[String]) -> SearchEntry {
		let all = requested.iter().any(|name| name == "*");
		let mut entry =
			SearchEntry { dn: self.dn.clone(), attrs: HashMap::new(), bin_attrs: HashMap::new() };
		for (lower, (name, values)) in &self.attributes {
			if !all && !requested.iter().any(|wanted| wanted.eq_ignore_ascii_case(lower)) {
				continue;
			}
			let text: Result<Vec<String>, _> =
				values.iter().map(|value| String::from_utf8(value.clone())).collect();
			match text {
				Ok(text) => {
					entry.attrs.insert(name.clone(), text);
				}
				Err(_) => {
					entry.bin_attrs.insert(name.clone(), values.clone());
				}
			}
		}
		entry
	}

	/// Values of an attribute as lower-cased text.
	fn text_values(&self, attribute: &str) -> Vec<String> {
		self.attributes
			.get(attribute)
			.map(|(_, values)| {
				values.iter().map(|value| String::from_utf8_lossy(value).to_lowercase()).collect()
			})
			.unwrap_or_default()
	}
}

/// Comparison of a filter item.
#[derive(Debug, Clone, Copy)]
enum Operator {
	/// `=`, including presence and substrings
	Equal,
	/// `~=`
	Approximate,
	/// `>=`
	Greater,
	/// `<=`
	Lower,
}

/// Parsed search filter.
#[derive(Debug)]
enum Filter {
	/// `(&...)`
	And(Vec<Filter>),
	/// `(|...)`
	Or(Vec<Filter>),
	/// `(!...)`
	Not(Box<Filter>),
	/// `(attr<op>value)`
	Item {
		/// Lower-cased attribute name without matching rule
		attribute: String,
		/// Comparison
		operator: Operator,
		/// Escaped value
		value: String,
	},
}

/// Error for a filter the parser does not understand.
fn invalid(filter: &str) -> Error {
	Error::InvalidQuery(format!("unparsable filter `{filter}`"))
}

impl Filter {
	/// Parse a complete filter.
	fn parse(input: &str) -> Result<Self, Error> {
		match Self::parse_one(input.trim())? {
			(filter, "") => Ok(filter),
			_ => Err(invalid(input)),
		}
	}

	/// Parse one parenthesized filter, returning the rest of the input.
	fn parse_one(input: &str) -> Result<(Self, &str), Error> {
		let body = input.strip_prefix('(').ok_or_else(|| invalid(input))?;
		match body.chars().next() {
			Some('&') => {
				let (filters, rest) = Self::parse_list(&body[1..])?;
				Ok((Filter::And(filters), rest))
			}
			Some('|') => {
				let (filters, rest) = Self::parse_list(&body[1..])?;
				Ok((Filter::Or(filters), rest))
			}
			Some('!') => {
				let (inner, rest) = Self::parse_one(&body[1..])?;
				let rest = rest.strip_prefix(')').ok_or_else(|| invalid(input))?;
				Ok((Filter::Not(Box::new(inner)), rest))
			}
			_ => {
				let end = body.find(')').ok_or_else(|| invalid(input))?;
				Ok((Self::parse_item(&body[..end])?, &body[end + 1..]))
			}
		}
	}

	/// Parse filters up to the closing parenthesis of a list.
	fn parse_list(mut input: &str) -> Result<(Vec<Self>, &str), Error> {
		let mut filters = Vec::new();
		loop {
			if let Some(rest) = input.strip_prefix(')') {
				return Ok((filters, rest));
			}
			let (filter, rest) = Self::parse_one(input)?;
			filters.push(filter);
			input = rest;
		}
	}

	/// Parse `attr<op>value`.
	fn parse_item(item: &str) -> Result<Self, Error> {
		let equals = item.find('=').ok_or_else(|| invalid(item))?;
		let (attribute, operator) = match item[..equals].chars().last() {
			Some('~') => (&item[..equals - 1], Operator::Approximate),
			Some('>') => (&item[..equals - 1], Operator::Greater),
			Some('<') => (&item[..equals - 1], Operator::Lower),
			_ => (&item[..equals], Operator::Equal),
		};
		let attribute = attribute.split(':').next().unwrap_or_default().to_lowercase();
		if attribute.is_empty() {
			return Err(invalid(item));
		}
		Ok(Filter::Item { attribute, operator, value: item[equals + 1..].to_owned() })
	}

	/// Evaluate against an entry.
	fn matches(&self, entry: &Stored) -> bool {
		match self {
			Filter::And(filters) => filters.iter().all(|filter| filter.matches(entry)),
			Filter::Or(filters) => filters.iter().any(|filter| filter.matches(entry)),
			Filter::Not(filter) => !filter.matches(entry),
			Filter::Item { attribute, operator, value } => {
				let values = entry.text_values(attribute);
				match operator {
					Operator::Equal if value == "*" => !values.is_empty(),
					Operator::Equal if value.contains('*') => {
						let pattern: Vec<String> = value.split('*').map(unescape).collect();
						values.iter().any(|candidate| wildcard_match(candidate, &pattern))
					}
					Operator::Equal | Operator::Approximate => {
						let value = unescape(value);
						values.iter().any(|candidate| *candidate == value)
					}
					Operator::Greater => {
						let value = unescape(value);
						values.iter().any(|candidate| compare(candidate, &value).is_ge())
					}
					Operator::Lower => {
						let value = unescape(value);
						values.iter().any(|candidate| compare(candidate, &value).is_le())
					}
				}
			}
		}
	}
}

/// Resolve `\XX` escapes and lower-case the value.
fn unescape(value: &str) -> String {
	let mut bytes = Vec::with_capacity(value.len());
	let raw = value.as_bytes();
	let mut index = 0;
	while index < raw.len() {
		let escaped = raw
			.get(index + 1..index + 3)
			.filter(|_| raw[index] == b'\\')
			.and_then(|hex| u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok());
		match escaped {
			Some(byte) => {
				bytes.push(byte);
				index += 3;
			}
			None => {
				bytes.push(raw[index]);
				index += 1;
			}
		}
	}
	String::from_utf8_lossy(&bytes).to_lowercase()
}

/// Compare numerically when both sides are numbers, as text otherwise.
fn compare(a: &str, b: &str) -> std::cmp::Ordering {
	match (a.parse::<i64>(), b.parse::<i64>()) {
		(Ok(a), Ok(b)) => a.cmp(&b),
		_ => a.cmp(b),
	}
}

/// Match a value against the segments of a substring filter.
fn wildcard_match(value: &str, segments: &[String]) -> bool {
	let Some((first, rest)) = segments.split_first() else { return false };
	let Some((last, middle)) = rest.split_last() else { return value == first };
	let Some(mut remainder) = value.strip_prefix(first.as_str()) else { return false };
	for segment in middle {
		match remainder.find(segment.as_str()) {
			Some(index) => remainder = &remainder[index + segment.len()..],
			None => return false,
		}
	}
	remainder.ends_with(last.as_str())
}

impl Directory for MemoryDirectory {
	fn connect(&mut self, mode: AccessMode) -> Result<(), Error> {
		self.ensure_connected(mode);
		Ok(())
	}

	fn disconnect(&mut self) -> Result<(), Error> {
		self.connected = false;
		self.mode = None;
		Ok(())
	}

	fn scope(&self) -> SearchScope {
		self.scope
	}

	fn count_limit(&self) -> Option<i32> {
		self.count_limit.filter(|limit| *limit != UNLIMITED)
	}

	fn search(&mut self, request: &SearchRequest) -> Result<Vec<SearchEntry>, Error> {
		self.ensure_connected(AccessMode::ReadOnly);
		self.searches.push(request.clone());

		let filter = Filter::parse(&request.filter)?;
		let base = key(&request.base);
		if !base.is_empty() && !self.entries.contains_key(&base) {
			return match request.scope {
				SearchScope::Object => Ok(Vec::new()),
				_ => Err(server_error(32, "noSuchObject")),
			};
		}

		let mut found: Vec<&Stored> = self
			.entries
			.iter()
			.filter(|(name, stored)| in_scope(name, &base, request.scope) && filter.matches(stored))
			.map(|(_, stored)| stored)
			.collect();
		if let Some(attribute) = &request.sort_by {
			let attribute = attribute.to_lowercase();
			found.sort_by_key(|stored| stored.text_values(&attribute).into_iter().next());
		}
		if let Some(limit) = request.size_limit.and_then(|limit| usize::try_from(limit).ok()) {
			if limit > 0 {
				found.truncate(limit);
			}
		}
		Ok(found.into_iter().map(|stored| stored.project(&request.attributes)).collect())
	}

	fn add(&mut self, dn: &str, attributes: &[(String, Vec<Value>)]) -> Result<(), Error> {
		self.ensure_connected(AccessMode::ReadWrite);
		if self.contains(dn) {
			return Err(server_error(68, "entryAlreadyExists"));
		}
		let mut stored = Stored { dn: dn.to_owned(), attributes: BTreeMap::new() };
		for (name, values) in attributes {
			let values = values.iter().map(Value::encode).collect::<Result<Vec<_>, _>>()?;
			stored.attributes.insert(name.to_lowercase(), (name.clone(), values));
		}
		self.entries.insert(key(dn), stored);
		Ok(())
	}

	fn modify(&mut self, dn: &str, modifications: &[Modification]) -> Result<(), Error> {
		self.ensure_connected(AccessMode::ReadWrite);
		if let Some(rejected) = &self.reject {
			if modifications.iter().any(|m| m.attribute().eq_ignore_ascii_case(rejected)) {
				return Err(server_error(53, "unwillingToPerform"));
			}
		}
		let stored = self.entries.get(&key(dn)).ok_or_else(|| server_error(32, "noSuchObject"))?;
		let mut attributes = stored.attributes.clone();

		for modification in modifications {
			let name = modification.attribute().to_lowercase();
			let values =
				modification.values().iter().map(Value::encode).collect::<Result<Vec<_>, _>>()?;
			match modification {
				Modification::Add(given, _) => {
					let current =
						&mut attributes.entry(name).or_insert_with(|| (given.clone(), Vec::new())).1;
					for value in values {
						if current.contains(&value) {
							return Err(server_error(20, "attributeOrValueExists"));
						}
						current.push(value);
					}
				}
				Modification::Replace(given, _) => {
					if values.is_empty() {
						attributes.remove(&name);
					} else {
						attributes.insert(name, (given.clone(), values));
					}
				}
				Modification::Remove(..) => {
					let Some((_, current)) = attributes.get_mut(&name) else {
						return Err(server_error(16, "noSuchAttribute"));
					};
					for value in &values {
						let lowered = String::from_utf8_lossy(value).to_lowercase();
						let position = current.iter().position(|candidate| {
							candidate == value || String::from_utf8_lossy(candidate).to_lowercase() == lowered
						});
						match position {
							Some(position) => {
								current.remove(position);
							}
							None => return Err(server_error(16, "noSuchAttribute")),
						}
					}
					if values.is_empty() || current.is_empty() {
						attributes.remove(&name);
					}
				}
			}
		}

		if let Some(stored) = self.entries.get_mut(&key(dn)) {
			stored.attributes = attributes;
		}
		self.modifications.push((dn.to_owned(), modifications.to_vec()));
		Ok(())
	}

	fn delete(&mut self, dn: &str) -> Result<(), Error> {
		self.ensure_connected(AccessMode::ReadWrite);
		let name = key(dn);
		if !self.entries.contains_key(&name) {
			return Err(server_error(32, "noSuchObject"));
		}
		if self.entries.keys().any(|other| other.ends_with(&format!(",{name}"))) {
			return Err(server_error(66, "notAllowedOnNonLeaf"));
		}
		self.entries.remove(&name);
		self.deleted.push(dn.to_owned());
		Ok(())
	}

	fn rename(&mut self, dn: &str, rdn: &str, new_superior: Option<&str>) -> Result<(), Error> {
		self.ensure_connected(AccessMode::ReadWrite);
		let old = key(dn);
		if !self.entries.contains_key(&old) {
			return Err(server_error(32, "noSuchObject"));
		}
		let parent = new_superior.or(split_rdn(dn).1);
		let renamed = match parent {
			Some(parent) => format!("{rdn},{parent}"),
			None => rdn.to_owned(),
		};
		if self.contains(&renamed) {
			return Err(server_error(68, "entryAlreadyExists"));
		}

		let moved: Vec<String> = self
			.entries
			.keys()
			.filter(|name| **name == old || name.ends_with(&format!(",{old}")))
			.cloned()
			.collect();
		for name in moved {
			if let Some(mut stored) = self.entries.remove(&name) {
				let prefix = &stored.dn[..stored.dn.len() - dn.trim().len()];
				stored.dn = format!("{prefix}{renamed}");
				self.entries.insert(key(&stored.dn), stored);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::{Filter, MemoryDirectory};
	use crate::{
		config::SearchScope,
		session::{Directory, SearchRequest},
	};

	#[test]
	fn evaluates_filters() {
		let mut directory = MemoryDirectory::default();
		directory.insert("dc=example,dc=org", [("objectClass", "domain")]);
		directory.insert(
			"uid=jdoe,dc=example,dc=org",
			[("objectClass", "person"), ("uid", "jdoe"), ("uidNumber", "1000")],
		);

		let search = |directory: &mut MemoryDirectory, filter: &str| {
			let request = SearchRequest::new("dc=example,dc=org", SearchScope::Subtree, filter);
			directory.search(&request).unwrap().len()
		};
		assert_eq!(search(&mut directory, "(objectClass=*)"), 2);
		assert_eq!(search(&mut directory, "(&(objectclass=PERSON)(uid=*do*))"), 1);
		assert_eq!(search(&mut directory, "(|(uid=nobody)(!(uid=jdoe)))"), 1);
		assert_eq!(search(&mut directory, "(uidNumber>=999)"), 1);
		assert_eq!(search(&mut directory, "(uid=j*e)"), 1);
		assert!(Filter::parse("(uid=x").is_err());
	}
}
