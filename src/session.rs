//! Sessions with a directory server.
//!
//! [`Directory`] is the seam between the reading and writing logic of this
//! crate and the protocol. [`Session`] implements it on top of a blocking
//! [`LdapConn`].
use std::{collections::HashSet, fmt, path::PathBuf, time::Duration};

use ldap3::{
	controls::RawControl, LdapConn, LdapResult, Mod, SearchEntry, SearchOptions, SearchResult,
};
use tracing::{debug, info, warn};

use crate::{
	config::{BindCredentials, Config, ConnectionConfig, SearchScope, UNLIMITED},
	error::Error,
	identity::Value,
};

/// OID of the server side sort request control, RFC 2891
const SORT_REQUEST_OID: &str = "1.2.840.113556.1.4.473";

/// Idle timeout requested from the transport when pooling is enabled
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// What a session is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
	/// Searches and lookups only
	ReadOnly,
	/// Searches, lookups and modifications
	ReadWrite,
}

/// A typed modification of a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Modification {
	/// Add the values to the attribute, creating it if needed
	Add(String, Vec<Value>),
	/// Replace all values of the attribute
	Replace(String, Vec<Value>),
	/// Remove the values from the attribute, or the whole attribute if no
	/// values are given
	Remove(String, Vec<Value>),
}

impl Modification {
	/// The attribute the modification applies to.
	#[must_use]
	pub fn attribute(&self) -> &str {
		match self {
			Modification::Add(name, _)
			| Modification::Replace(name, _)
			| Modification::Remove(name, _) => name,
		}
	}

	/// The values of the modification.
	#[must_use]
	pub fn values(&self) -> &[Value] {
		match self {
			Modification::Add(_, values)
			| Modification::Replace(_, values)
			| Modification::Remove(_, values) => values,
		}
	}

	/// Convert into the protocol representation.
	fn to_mod(&self) -> Result<Mod<Vec<u8>>, Error> {
		let name = self.attribute().as_bytes().to_vec();
		let values = encode_values(self.values())?;
		Ok(match self {
			Modification::Add(..) => Mod::Add(name, values),
			Modification::Replace(..) => Mod::Replace(name, values),
			Modification::Remove(..) => Mod::Delete(name, values),
		})
	}
}

/// Encode values into the set the protocol transfers.
fn encode_values(values: &[Value]) -> Result<HashSet<Vec<u8>>, Error> {
	values.iter().map(Value::encode).collect()
}

/// Parameters of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
	/// Entry the search starts at
	pub base: String,
	/// How deep the search descends
	pub scope: SearchScope,
	/// Search filter
	pub filter: String,
	/// Attributes to return
	pub attributes: Vec<String>,
	/// Maximum number of entries the server should return
	pub size_limit: Option<i32>,
	/// Attribute the server should order results by
	pub sort_by: Option<String>,
}

impl SearchRequest {
	/// Create a request returning all user attributes.
	#[must_use]
	pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
		Self {
			base: base.into(),
			scope,
			filter: filter.into(),
			attributes: vec!["*".to_owned()],
			size_limit: None,
			sort_by: None,
		}
	}

	/// Set the attributes to return.
	#[must_use]
	pub fn attributes<S: Into<String>>(mut self, attributes: impl IntoIterator<Item = S>) -> Self {
		self.attributes = attributes.into_iter().map(Into::into).collect();
		self
	}

	/// Limit the number of returned entries.
	#[must_use]
	pub fn size_limit(mut self, limit: Option<i32>) -> Self {
		self.size_limit = limit;
		self
	}

	/// Ask the server to order the results by an attribute.
	#[must_use]
	pub fn sort_by(mut self, attribute: impl Into<String>) -> Self {
		self.sort_by = Some(attribute.into());
		self
	}
}

/// Operations of a directory server.
///
/// Implementations hold at most one live connection, which is opened by
/// [`Directory::connect`] (or lazily by the first operation) and released by
/// [`Directory::disconnect`]. They are not safe for concurrent use.
pub trait Directory {
	/// Open the connection. Returns immediately if it is already open.
	fn connect(&mut self, mode: AccessMode) -> Result<(), Error>;

	/// Close the connection. Does nothing if it is not open.
	fn disconnect(&mut self) -> Result<(), Error>;

	/// Scope applied to searches.
	fn scope(&self) -> SearchScope;

	/// Maximum number of entries searches return, if limited.
	fn count_limit(&self) -> Option<i32>;

	/// Run a search. Reaching the size limit is not an error; the entries
	/// received so far are returned. An object scope search of an entry that
	/// does not exist returns no entries.
	fn search(&mut self, request: &SearchRequest) -> Result<Vec<SearchEntry>, Error>;

	/// Create an entry.
	fn add(&mut self, dn: &str, attributes: &[(String, Vec<Value>)]) -> Result<(), Error>;

	/// Apply modifications to an entry in a single request.
	fn modify(&mut self, dn: &str, modifications: &[Modification]) -> Result<(), Error>;

	/// Remove an entry.
	fn delete(&mut self, dn: &str) -> Result<(), Error>;

	/// Give an entry a new relative name, optionally moving it below a new
	/// superior.
	fn rename(&mut self, dn: &str, rdn: &str, new_superior: Option<&str>) -> Result<(), Error>;
}

/// Run an operation on an open connection, closing the connection afterwards
/// whether the operation succeeded or not.
pub(crate) fn scoped<D, T>(
	directory: &mut D,
	mode: AccessMode,
	operation: impl FnOnce(&mut D) -> Result<T, Error>,
) -> Result<T, Error>
where
	D: Directory + ?Sized,
{
	let result = directory.connect(mode).and_then(|()| operation(directory));
	match (result, directory.disconnect()) {
		(Ok(value), Ok(())) => Ok(value),
		(Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err),
		(Err(err), Err(close_err)) => {
			warn!("Closing the directory session failed: {close_err}");
			Err(err)
		}
	}
}

/// Transport hints requested when pooling is enabled. The hints are always
/// set and cleared together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHints {
	/// How long an idle pooled connection may be kept
	pub idle_timeout: Duration,
}

/// A session with a directory server.
pub struct Session {
	/// Where and how to connect
	connection: ConnectionConfig,
	/// Who to bind as
	bind: Option<BindCredentials>,
	/// Scope of searches
	scope: SearchScope,
	/// Count limit of searches, positive or [`UNLIMITED`]
	count_limit: i32,
	/// Pooling hints, if pooling is enabled
	pool: Option<PoolHints>,
	/// The live connection
	conn: Option<LdapConn>,
	/// What the live connection was opened for
	mode: Option<AccessMode>,
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("connection", &self.connection)
			.field("bind", &self.bind)
			.field("scope", &self.scope)
			.field("count_limit", &self.count_limit)
			.field("pool", &self.pool)
			.field("connected", &self.conn.is_some())
			.field("mode", &self.mode)
			.finish()
	}
}

impl Session {
	/// Create an unconnected, anonymous session.
	#[must_use]
	pub fn new(connection: ConnectionConfig) -> Self {
		let mut session = Self {
			connection,
			bind: None,
			scope: SearchScope::default(),
			count_limit: UNLIMITED,
			pool: None,
			conn: None,
			mode: None,
		};
		let pooling = session.connection.pooling;
		session.set_pooling(pooling);
		session
	}

	/// Create an unconnected session from the configuration.
	#[must_use]
	pub fn from_config(config: &Config) -> Self {
		let mut session = Self::new(config.connection.clone());
		session.bind = config.bind.clone();
		session.set_scope(config.scope);
		session.set_count_limit(config.count_limit);
		session
	}

	/// Bind as the given account on the next connect.
	pub fn set_credentials(&mut self, dn: impl Into<String>, password: impl Into<String>) {
		self.bind = Some(BindCredentials::new(dn, password));
	}

	/// Use TLS on a dedicated port. Without a trust store configured, the
	/// server certificate is accepted without verification.
	pub fn set_secure(&mut self, secure: bool) {
		self.connection.tls.secure = secure;
	}

	/// Use TLS, trusting the certificates of the given PEM file.
	pub fn set_trust_store(&mut self, path: impl Into<PathBuf>) {
		self.connection.tls.secure = true;
		self.connection.tls.trust_store = Some(path.into());
	}

	/// Set the port, or fall back to the default port with `None`.
	pub fn set_port(&mut self, port: Option<u16>) {
		self.connection.port = port;
	}

	/// Set the timeout for establishing a connection.
	pub fn set_timeout(&mut self, timeout: Duration) {
		self.connection.timeout = timeout.as_secs();
	}

	/// Enable or disable connection pooling hints. The library keeps no pool
	/// of its own, and `ldap3` has no connection pool to hand the hints to:
	/// they are only recorded for callers that manage sessions themselves.
	pub fn set_pooling(&mut self, enabled: bool) {
		self.connection.pooling = enabled;
		self.pool = enabled.then_some(PoolHints { idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT });
	}

	/// The pooling hints, if pooling is enabled.
	#[must_use]
	pub fn pool_hints(&self) -> Option<PoolHints> {
		self.pool
	}

	/// Set the scope of searches.
	pub fn set_scope(&mut self, scope: SearchScope) {
		self.scope = scope;
	}

	/// Set the maximum number of entries searches return. Accepts positive
	/// numbers and [`UNLIMITED`]; any other value is ignored.
	pub fn set_count_limit(&mut self, limit: i32) {
		if limit > 0 || limit == UNLIMITED {
			self.count_limit = limit;
		} else {
			debug!(limit, "Ignoring invalid count limit");
		}
	}

	/// Whether a connection is open.
	#[must_use]
	pub fn is_connected(&self) -> bool {
		self.conn.is_some()
	}

	/// What the open connection was opened for.
	#[must_use]
	pub fn mode(&self) -> Option<AccessMode> {
		self.mode
	}

	/// Bind as the given account on a fresh connection and close it again,
	/// verifying the credentials.
	pub fn authenticate(&self, dn: &str, password: &str) -> Result<(), Error> {
		if password.is_empty() {
			return Err(Error::InvalidArgument("empty password".to_owned()));
		}
		let mut session = Session::new(self.connection.clone());
		session.set_credentials(dn, password);
		scoped(&mut session, AccessMode::ReadOnly, |_| Ok(()))
	}

	/// The URL connections are made to, for error messages.
	fn target(&self) -> String {
		match self.connection.url() {
			Ok(url) => url.to_string(),
			Err(_) => self.connection.host.clone(),
		}
	}

	/// Establish and bind a new connection.
	fn open(&self, mode: AccessMode) -> Result<LdapConn, Error> {
		let url = self.connection.url()?;
		let target = url.to_string();
		let settings = self.connection.to_settings()?;
		debug!(url = %target, ?mode, pool = ?self.pool, "Connecting to directory server");

		let mut conn = LdapConn::from_url_with_settings(settings, &url)
			.map_err(|err| Error::Connect { url: target.clone(), message: err.to_string() })?;
		if let Some(bind) = &self.bind {
			conn.simple_bind(&bind.dn, &bind.password)
				.and_then(LdapResult::success)
				.map_err(|err| Error::Connect { url: target.clone(), message: err.to_string() })?;
		}
		info!(url = %target, "Directory session established");
		Ok(conn)
	}

	/// The live connection, connecting first if necessary.
	fn handle(&mut self, mode: AccessMode) -> Result<&mut LdapConn, Error> {
		if self.conn.is_none() {
			let conn = self.open(mode)?;
			self.conn = Some(conn);
			self.mode = Some(mode);
		} else if mode == AccessMode::ReadWrite {
			self.mode = Some(mode);
		}
		let url = self.target();
		self.conn.as_mut().ok_or(Error::Unavailable { url })
	}
}

impl Directory for Session {
	fn connect(&mut self, mode: AccessMode) -> Result<(), Error> {
		self.handle(mode).map(|_| ())
	}

	fn disconnect(&mut self) -> Result<(), Error> {
		self.mode = None;
		if let Some(mut conn) = self.conn.take() {
			conn.unbind()?;
			debug!("Directory session closed");
		}
		Ok(())
	}

	fn scope(&self) -> SearchScope {
		self.scope
	}

	fn count_limit(&self) -> Option<i32> {
		(self.count_limit > 0).then_some(self.count_limit)
	}

	fn search(&mut self, request: &SearchRequest) -> Result<Vec<SearchEntry>, Error> {
		debug!(
			base = %request.base,
			scope = ?request.scope,
			filter = %request.filter,
			"Searching directory"
		);
		let mut options = SearchOptions::new();
		if let Some(limit) = request.size_limit {
			options = options.sizelimit(limit);
		}

		let ldap = self.handle(AccessMode::ReadOnly)?;
		if let Some(attribute) = &request.sort_by {
			ldap.with_controls(vec![sort_control(attribute)]);
		}
		let SearchResult(entries, result) = ldap.with_search_options(options).search(
			&request.base,
			request.scope.into(),
			&request.filter,
			request.attributes.clone(),
		)?;

		match result.rc {
			0 => {}
			4 => debug!(base = %request.base, "Search stopped at the size limit"),
			32 if request.scope == SearchScope::Object => return Ok(Vec::new()),
			_ => {
				result.success()?;
			}
		}
		Ok(entries.into_iter().map(SearchEntry::construct).collect())
	}

	fn add(&mut self, dn: &str, attributes: &[(String, Vec<Value>)]) -> Result<(), Error> {
		let attributes = attributes
			.iter()
			.map(|(name, values)| Ok((name.as_bytes().to_vec(), encode_values(values)?)))
			.collect::<Result<Vec<_>, Error>>()?;
		debug!(dn = %dn, attributes = attributes.len(), "Adding entry");
		self.handle(AccessMode::ReadWrite)?.add(dn, attributes)?.success()?;
		Ok(())
	}

	fn modify(&mut self, dn: &str, modifications: &[Modification]) -> Result<(), Error> {
		let mods =
			modifications.iter().map(Modification::to_mod).collect::<Result<Vec<_>, Error>>()?;
		debug!(dn = %dn, modifications = mods.len(), "Modifying entry");
		self.handle(AccessMode::ReadWrite)?.modify(dn, mods)?.success()?;
		Ok(())
	}

	fn delete(&mut self, dn: &str) -> Result<(), Error> {
		debug!(dn = %dn, "Deleting entry");
		self.handle(AccessMode::ReadWrite)?.delete(dn)?.success()?;
		Ok(())
	}

	fn rename(&mut self, dn: &str, rdn: &str, new_superior: Option<&str>) -> Result<(), Error> {
		debug!(dn = %dn, rdn = %rdn, "Renaming entry");
		self.handle(AccessMode::ReadWrite)?.modifydn(dn, rdn, true, new_superior)?.success()?;
		Ok(())
	}
}

/// Non-critical server side sort request control ordering by one attribute.
fn sort_control(attribute: &str) -> RawControl {
	RawControl {
		ctype: SORT_REQUEST_OID.to_owned(),
		crit: false,
		val: Some(encode_sort_keys(attribute)),
	}
}

/// BER encoding of `SortKeyList ::= SEQUENCE OF SEQUENCE { attributeType
/// OCTET STRING }` with a single key.
fn encode_sort_keys(attribute: &str) -> Vec<u8> {
	let attribute_type = ber_tlv(0x04, attribute.as_bytes());
	let sort_key = ber_tlv(0x30, &attribute_type);
	ber_tlv(0x30, &sort_key)
}

/// Encode a BER tag-length-value triple with a definite length.
fn ber_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
	let mut encoded = vec![tag];
	match u8::try_from(content.len()) {
		Ok(length) if length < 0x80 => encoded.push(length),
		_ => {
			let length = content.len().to_be_bytes();
			let skip = length.iter().take_while(|byte| **byte == 0).count();
			let significant = &length[skip..];
			encoded.push(0x80 | significant.len() as u8);
			encoded.extend_from_slice(significant);
		}
	}
	encoded.extend_from_slice(content);
	encoded
}
