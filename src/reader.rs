//! Reading entries: point lookups, searches and existence checks.
use std::collections::HashSet;

use icu_collator::{Collator, CollatorOptions};
use icu_locid::Locale;
use ldap3::SearchEntry;
use tracing::debug;

use crate::{
	config::{Config, SearchScope},
	entry::{Projection, SearchEntryExt, MODIFY_TIMESTAMP},
	error::Error,
	filter::{compile, compile_or_match_all, resolve_branches, MATCH_ALL, NO_ATTRIBUTES},
	identity::{Identity, Value},
	query::{Combinator, Query},
	session::{scoped, AccessMode, Directory, SearchRequest, Session},
};

/// Marker appended to sort keys until they are unique
const COLLISION_MARKER: char = '0';

/// Result limit of [`Reader::check_search`]
const CHECK_LIMIT: i32 = 2;

/// Reads entries below a fixed base.
///
/// Every operation opens the session, and closes it again before returning,
/// whether the operation succeeded or not.
#[derive(Debug)]
pub struct Reader<D: Directory = Session> {
	/// Session used for every operation
	directory: D,
	/// Root of searches
	base: String,
	/// BCP-47 tag of the collation used by sorted searches
	sort_locale: String,
}

impl Reader<Session> {
	/// Create a reader with a session built from the configuration.
	#[must_use]
	pub fn from_config(config: &Config) -> Self {
		Reader::new(Session::from_config(config), config.base_dn.clone())
			.with_sort_locale(config.sort_locale.clone())
	}
}

impl<D: Directory> Reader<D> {
	/// Create a reader searching below `base`.
	pub fn new(directory: D, base: impl Into<String>) -> Self {
		Self { directory, base: base.into(), sort_locale: "und".to_owned() }
	}

	/// Set the locale whose collation orders sorted searches.
	#[must_use]
	pub fn with_sort_locale(mut self, locale: impl Into<String>) -> Self {
		self.sort_locale = locale.into();
		self
	}

	/// The root of searches.
	#[must_use]
	pub fn base(&self) -> &str {
		&self.base
	}

	/// The underlying session.
	pub fn directory(&self) -> &D {
		&self.directory
	}

	/// The underlying session, mutably, e.g. to change its settings.
	pub fn directory_mut(&mut self) -> &mut D {
		&mut self.directory
	}

	/// Whether the entry exists.
	pub fn check_entry(&mut self, dn: &str) -> Result<bool, Error> {
		scoped(&mut self.directory, AccessMode::ReadOnly, |directory| {
			Ok(read_entry(directory, dn, &[NO_ATTRIBUTES], &Projection::new())?.is_some())
		})
	}

	/// Whether the attribute of the entry holds any of the values, or is
	/// present at all if no values are given.
	pub fn check_entry_attribute<S: AsRef<str>>(
		&mut self,
		dn: &str,
		attribute: &str,
		values: &[S],
	) -> Result<bool, Error> {
		let query = if values.is_empty() {
			Query::default().condition(attribute, "*")
		} else {
			values.iter().fold(Query::new(Combinator::Or), |query, value| {
				query.condition(attribute, value.as_ref())
			})
		};
		let filter = compile(&query)?;
		let request = SearchRequest::new(dn, SearchScope::Object, filter).attributes([NO_ATTRIBUTES]);

		scoped(&mut self.directory, AccessMode::ReadOnly, |directory| {
			Ok(!directory.search(&request)?.is_empty())
		})
	}

	/// Whether the query matches at least one entry.
	pub fn check_search(&mut self, query: Query) -> Result<bool, Error> {
		let base = self.base.clone();
		scoped(&mut self.directory, AccessMode::ReadOnly, |directory| {
			let request = prepare(directory, &base, query)?
				.attributes([NO_ATTRIBUTES])
				.size_limit(Some(CHECK_LIMIT));
			Ok(!directory.search(&request)?.is_empty())
		})
	}

	/// All attributes of the entry, or `None` if it does not exist.
	pub fn get_entry(&mut self, dn: &str) -> Result<Option<Identity>, Error> {
		self.get_entry_projected(dn, &Projection::new())
	}

	/// The attributes of the entry the projection keeps, or `None` if it does
	/// not exist.
	pub fn get_entry_projected(
		&mut self,
		dn: &str,
		projection: &Projection,
	) -> Result<Option<Identity>, Error> {
		scoped(&mut self.directory, AccessMode::ReadOnly, |directory| {
			read_entry(directory, dn, &["*", MODIFY_TIMESTAMP], projection)
		})
	}

	/// The values of one attribute of the entry.
	pub fn get_entry_attribute(&mut self, dn: &str, attribute: &str) -> Result<Vec<Value>, Error> {
		scoped(&mut self.directory, AccessMode::ReadOnly, |directory| {
			let entry = read_entry(directory, dn, &[attribute], &Projection::new())?
				.ok_or_else(|| Error::EntryNotFound(dn.to_owned()))?;
			entry.attribute(attribute).map(<[Value]>::to_vec).ok_or_else(|| {
				Error::AttributeNotFound { dn: dn.to_owned(), attribute: attribute.to_owned() }
			})
		})
	}

	/// The entries matching the query, with all their attributes and their
	/// modification time.
	pub fn search(&mut self, query: Query) -> Result<Vec<Identity>, Error> {
		let base = self.base.clone();
		scoped(&mut self.directory, AccessMode::ReadOnly, |directory| {
			let request = prepare(directory, &base, query)?;
			Ok(materialize(directory.search(&request)?))
		})
	}

	/// The names of the entries matching the query. A limit overrides the
	/// count limit of the session.
	pub fn search_dn(&mut self, query: Query, limit: Option<i32>) -> Result<Vec<String>, Error> {
		let base = self.base.clone();
		scoped(&mut self.directory, AccessMode::ReadOnly, |directory| {
			let mut request = prepare(directory, &base, query)?.attributes([NO_ATTRIBUTES]);
			if limit.is_some() {
				request = request.size_limit(limit);
			}
			Ok(directory.search(&request)?.into_iter().map(|entry| entry.dn).collect())
		})
	}

	/// The entries matching the query, ordered by the first value of an
	/// attribute using the collation of the sort locale.
	///
	/// Entries sharing a value keep the order the server returned them in.
	pub fn sorted_search(&mut self, query: Query, attribute: &str) -> Result<Vec<Identity>, Error> {
		let collator = collator(&self.sort_locale)?;
		let base = self.base.clone();
		let records = scoped(&mut self.directory, AccessMode::ReadOnly, |directory| {
			let request = prepare(directory, &base, query)?.sort_by(attribute);
			Ok(materialize(directory.search(&request)?))
		})?;
		Ok(order(records, attribute, &collator))
	}
}

/// Build the search request for a query below `base`, resolving its branches.
fn prepare<D: Directory + ?Sized>(
	directory: &mut D,
	base: &str,
	query: Query,
) -> Result<SearchRequest, Error> {
	let (root, query) = resolve_branches(directory, base, query)?;
	let filter = compile_or_match_all(&query)?;
	Ok(SearchRequest::new(root, directory.scope(), filter)
		.attributes([MODIFY_TIMESTAMP, "*"])
		.size_limit(directory.count_limit()))
}

/// Turn search results into records.
fn materialize(entries: Vec<SearchEntry>) -> Vec<Identity> {
	let projection = Projection::new();
	entries.into_iter().map(|entry| entry.into_identity(&projection)).collect()
}

/// Read a single entry, or `None` if it does not exist.
pub(crate) fn read_entry<D: Directory + ?Sized>(
	directory: &mut D,
	dn: &str,
	attributes: &[&str],
	projection: &Projection,
) -> Result<Option<Identity>, Error> {
	let request = SearchRequest::new(dn, SearchScope::Object, MATCH_ALL)
		.attributes(attributes.iter().copied());
	Ok(directory.search(&request)?.into_iter().next().map(|entry| entry.into_identity(projection)))
}

/// Collator for a BCP-47 tag.
fn collator(tag: &str) -> Result<Collator, Error> {
	let locale: Locale =
		tag.parse().map_err(|err| Error::Config(format!("invalid sort locale {tag}: {err}")))?;
	Collator::try_new(&locale.into(), CollatorOptions::new())
		.map_err(|err| Error::Config(format!("unsupported sort locale {tag}: {err}")))
}

/// Sort keys of the records: the first value of the attribute, with the
/// collision marker appended until every key is unique.
fn sort_keys(records: &[Identity], attribute: &str) -> Vec<String> {
	let mut used = HashSet::with_capacity(records.len());
	let mut keys = Vec::with_capacity(records.len());
	for record in records {
		let mut key = record.first_value(attribute).map(ToString::to_string).unwrap_or_default();
		while used.contains(&key) {
			key.push(COLLISION_MARKER);
		}
		used.insert(key.clone());
		keys.push(key);
	}
	keys
}

/// Order records by their sort keys.
fn order(records: Vec<Identity>, attribute: &str, collator: &Collator) -> Vec<Identity> {
	let keys = sort_keys(&records, attribute);
	let mut keyed: Vec<(String, Identity)> = keys.into_iter().zip(records).collect();
	keyed.sort_by(|(a, _), (b, _)| collator.compare(a, b));
	debug!(entries = keyed.len(), "Ordered sorted search results by {attribute}");
	keyed.into_iter().map(|(_, record)| record).collect()
}
