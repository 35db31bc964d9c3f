//! Structured, nested boolean queries, compiled to search filters by
//! [`crate::filter`].

/// How the items of a [`Query`] are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Combinator {
	/// Every item must match
	#[default]
	And,
	/// At least one item must match
	Or,
}

/// How a [`Condition`] matches an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionType {
	/// `(attr=value)`
	Exact,
	/// `(attr=value*)`
	StartsWith,
	/// `(attr=*value)`
	EndsWith,
	/// `(attr=*value*)`
	Contains,
	/// `(!(attr=value))`
	NotExact,
	/// `(!(attr=*value*))`
	NotContains,
	/// Moves the search root below the entry matching `(attr=value)` one
	/// level under the current root. Contributes no filter text.
	Branch,
	/// `(attr~=value)`
	Approximate,
	/// `(attr>=value)`
	Greater,
	/// `(attr<=value)`
	Lower,
}

/// A single attribute test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
	/// How the attribute is matched
	pub kind: ConditionType,
	/// The attribute name, or an extensible match of the form `name:rule:`
	pub attribute: String,
	/// The value to match against
	pub value: String,
	/// Whether `*` in the value is matched literally instead of as a wildcard
	pub literal: bool,
}

impl Condition {
	/// Create a condition.
	#[must_use]
	pub fn new(kind: ConditionType, attribute: impl Into<String>, value: impl Into<String>) -> Self {
		Self { kind, attribute: attribute.into(), value: value.into(), literal: false }
	}

	/// Match `*` in the value literally.
	#[must_use]
	pub fn literal(mut self) -> Self {
		self.literal = true;
		self
	}

	/// Whether this condition relocates the search root instead of filtering.
	#[must_use]
	pub fn is_branch(&self) -> bool {
		self.kind == ConditionType::Branch
	}
}

/// An item of a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryItem {
	/// A leaf condition
	Condition(Condition),
	/// A nested query
	Query(Query),
}

impl QueryItem {
	/// Whether the item is a [`ConditionType::Branch`] condition.
	#[must_use]
	pub fn is_branch(&self) -> bool {
		matches!(self, QueryItem::Condition(condition) if condition.is_branch())
	}
}

/// An ordered sequence of conditions and nested queries, joined by a
/// [`Combinator`].
///
/// ```
/// use ldap_identity::{filter, Combinator, ConditionType, Query};
///
/// let query = Query::new(Combinator::And)
/// 	.condition("objectclass", "person")
/// 	.with(ConditionType::Contains, "uid", "jo");
/// assert_eq!(filter::compile(&query)?, "(&(objectclass=person)(uid=*jo*))");
/// # Ok::<(), ldap_identity::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
	/// How the items are combined
	combinator: Combinator,
	/// Conditions and nested queries, in insertion order
	items: Vec<QueryItem>,
}

impl Query {
	/// Create an empty query.
	#[must_use]
	pub fn new(combinator: Combinator) -> Self {
		Self { combinator, items: Vec::new() }
	}

	/// Add an [`ConditionType::Exact`] condition.
	#[must_use]
	pub fn condition(self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
		self.with(ConditionType::Exact, attribute, value)
	}

	/// Add an [`ConditionType::Exact`] condition whose value never acts as a
	/// wildcard, e.g. for a login name.
	#[must_use]
	pub fn literal(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
		self.push(QueryItem::Condition(
			Condition::new(ConditionType::Exact, attribute, value).literal(),
		));
		self
	}

	/// Add a condition of the given type.
	#[must_use]
	pub fn with(
		mut self,
		kind: ConditionType,
		attribute: impl Into<String>,
		value: impl Into<String>,
	) -> Self {
		self.push(QueryItem::Condition(Condition::new(kind, attribute, value)));
		self
	}

	/// Add a nested query.
	#[must_use]
	pub fn subquery(mut self, query: Query) -> Self {
		self.push(QueryItem::Query(query));
		self
	}

	/// Append an item.
	pub fn push(&mut self, item: QueryItem) {
		self.items.push(item);
	}

	/// How the items are combined.
	#[must_use]
	pub fn combinator(&self) -> Combinator {
		self.combinator
	}

	/// The items, in insertion order.
	#[must_use]
	pub fn items(&self) -> &[QueryItem] {
		&self.items
	}

	/// Number of items that contribute to the filter, i.e. every item except
	/// [`ConditionType::Branch`] conditions.
	#[must_use]
	pub fn total_conditions(&self) -> usize {
		self.items.iter().filter(|item| !item.is_branch()).count()
	}

	/// Whether the query has no items.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}
}

/// Consumes the query; each item is yielded exactly once, in order.
impl IntoIterator for Query {
	type Item = QueryItem;
	type IntoIter = std::vec::IntoIter<QueryItem>;

	fn into_iter(self) -> Self::IntoIter {
		self.items.into_iter()
	}
}
