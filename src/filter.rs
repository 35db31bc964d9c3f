//! Compilation of [`Query`] trees into search filters.
//!
//! Compilation happens in two passes. [`resolve_branches`] looks up every
//! [`ConditionType::Branch`] condition against the directory and returns the
//! relocated search root together with a query free of branches. [`compile`]
//! then renders the remaining conditions without touching the directory.
use tracing::debug;

use crate::{
	config::SearchScope,
	entry::relative_name,
	error::Error,
	query::{Combinator, Condition, ConditionType, Query, QueryItem},
	session::{Directory, SearchRequest},
};

/// Filter matching every entry, used when a query renders to nothing
pub const MATCH_ALL: &str = "(objectClass=*)";

/// Attribute list asking the server to return no attributes
pub(crate) const NO_ATTRIBUTES: &str = "1.1";

/// Render a query as a search filter.
///
/// Branch conditions are skipped. If more than one item remains, the rendered
/// items are wrapped in `(&...)` or `(|...)`; a single item is emitted
/// unwrapped, and a query without items renders to an empty string.
pub fn compile(query: &Query) -> Result<String, Error> {
	let mut parts = Vec::with_capacity(query.items().len());
	for item in query.items() {
		let part = match item {
			QueryItem::Condition(condition) if condition.is_branch() => continue,
			QueryItem::Condition(condition) => render_condition(condition)?,
			QueryItem::Query(nested) => compile(nested)?,
		};
		if !part.is_empty() {
			parts.push(part);
		}
	}

	Ok(match parts.len() {
		0 => String::new(),
		1 => parts.remove(0),
		_ => {
			let operator = match query.combinator() {
				Combinator::And => '&',
				Combinator::Or => '|',
			};
			format!("({operator}{})", parts.concat())
		}
	})
}

/// Render a query, falling back to [`MATCH_ALL`] when it renders to nothing.
pub fn compile_or_match_all(query: &Query) -> Result<String, Error> {
	let filter = compile(query)?;
	Ok(if filter.is_empty() { MATCH_ALL.to_owned() } else { filter })
}

/// Render a single condition.
fn render_condition(condition: &Condition) -> Result<String, Error> {
	let key = validate_key(&condition.attribute)?;
	let value = escape_value(&condition.value, condition.literal);

	Ok(match condition.kind {
		ConditionType::Exact => format!("({key}={value})"),
		ConditionType::StartsWith => format!("({key}={})", trailing_wildcard(value)),
		ConditionType::EndsWith => format!("({key}={})", leading_wildcard(value)),
		ConditionType::Contains => {
			format!("({key}={})", leading_wildcard(trailing_wildcard(value)))
		}
		ConditionType::NotExact => format!("(!({key}={value}))"),
		ConditionType::NotContains => {
			format!("(!({key}={}))", leading_wildcard(trailing_wildcard(value)))
		}
		ConditionType::Approximate => format!("({key}~={value})"),
		ConditionType::Greater => format!("({key}>={value})"),
		ConditionType::Lower => format!("({key}<={value})"),
		ConditionType::Branch => String::new(),
	})
}

/// Append a wildcard unless the value already ends in one.
fn trailing_wildcard(mut value: String) -> String {
	if !value.ends_with('*') {
		value.push('*');
	}
	value
}

/// Prepend a wildcard unless the value already starts with one.
fn leading_wildcard(value: String) -> String {
	if value.starts_with('*') {
		value
	} else {
		format!("*{value}")
	}
}

/// Hex-escape the characters that would break the filter structure. `*` is
/// kept so wildcards in values stay wildcards, unless the value is literal.
fn escape_value(value: &str, literal: bool) -> String {
	let mut escaped = String::with_capacity(value.len());
	for c in value.chars() {
		match c {
			'(' => escaped.push_str("\\28"),
			')' => escaped.push_str("\\29"),
			'\\' => escaped.push_str("\\5c"),
			'\0' => escaped.push_str("\\00"),
			'*' if literal => escaped.push_str("\\2a"),
			_ => escaped.push(c),
		}
	}
	escaped
}

/// Check an attribute key. Keys containing a colon must have the extensible
/// match form `name:rule:`; other keys are restricted to the characters of
/// attribute descriptions.
fn validate_key(key: &str) -> Result<&str, Error> {
	let key = key.trim();
	let is_word = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());

	let valid = if key.contains(':') {
		let mut parts = key.split(':');
		matches!(
			(parts.next(), parts.next(), parts.next(), parts.next()),
			(Some(name), Some(rule), Some(""), None) if is_word(name) && is_word(rule)
		)
	} else {
		!key.is_empty()
			&& key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ';'))
	};

	if valid {
		Ok(key)
	} else {
		Err(Error::InvalidQuery(format!("invalid attribute key `{key}`")))
	}
}

/// Resolve the branch conditions of a query, at any depth, in order.
///
/// Every branch searches one level below the current root for
/// `(attr=value)`; each match prepends its name relative to the root the
/// search ran at. Returns the final root and the query without its branch
/// conditions.
pub fn resolve_branches<D: Directory + ?Sized>(
	directory: &mut D,
	root: &str,
	query: Query,
) -> Result<(String, Query), Error> {
	let mut root = root.to_owned();
	let query = strip_branches(directory, &mut root, query)?;
	Ok((root, query))
}

/// Walk the query, moving `root` for every branch condition.
fn strip_branches<D: Directory + ?Sized>(
	directory: &mut D,
	root: &mut String,
	query: Query,
) -> Result<Query, Error> {
	let mut stripped = Query::new(query.combinator());
	for item in query {
		match item {
			QueryItem::Condition(condition) if condition.is_branch() => {
				relocate(directory, root, &condition)?;
			}
			QueryItem::Condition(condition) => stripped.push(QueryItem::Condition(condition)),
			QueryItem::Query(nested) => {
				let nested = strip_branches(directory, root, nested)?;
				stripped.push(QueryItem::Query(nested));
			}
		}
	}
	Ok(stripped)
}

/// Move the root below the entries matching a branch condition.
fn relocate<D: Directory + ?Sized>(
	directory: &mut D,
	root: &mut String,
	branch: &Condition,
) -> Result<(), Error> {
	let filter = render_condition(&Condition::new(
		ConditionType::Exact,
		branch.attribute.clone(),
		branch.value.clone(),
	))?;
	let request = SearchRequest::new(root.clone(), SearchScope::OneLevel, filter)
		.attributes([NO_ATTRIBUTES]);
	let searched_at = root.clone();

	for entry in directory.search(&request)? {
		*root = if searched_at.is_empty() {
			entry.dn
		} else {
			format!("{},{root}", relative_name(&entry.dn, &searched_at))
		};
	}
	debug!(root = %root, "Resolved branch {}={}", branch.attribute, branch.value);
	Ok(())
}
