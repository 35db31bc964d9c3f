//! Error codes

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// Establishing or binding the connection to the directory server failed.
	#[error("Cannot connect to {url}: {message}")]
	Connect {
		/// The URL the connection was attempted against
		url: String,
		/// Why the attempt failed
		message: String,
	},
	/// A connection was requested but no live handle is available.
	#[error("Directory service not available at {url}")]
	Unavailable {
		/// The URL of the directory server
		url: String,
	},
	/// A query could not be compiled into a search filter.
	#[error("Invalid query: {0}")]
	InvalidQuery(String),
	/// A search scope outside of object, one-level and subtree.
	#[error("Invalid scope: {0}")]
	InvalidScope(String),
	/// A caller supplied an empty identifier, attribute name or value.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	/// The entry does not exist in the directory.
	#[error("Entry not found: {0}")]
	EntryNotFound(String),
	/// The entry exists but does not hold the attribute.
	#[error("Attribute [{attribute}] not found in entry {dn}")]
	AttributeNotFound {
		/// The entry that was inspected
		dn: String,
		/// The missing attribute
		attribute: String,
	},
	/// Setting a password failed. Any entry created as part of the same
	/// operation has been removed again.
	#[error("Cannot set user password: {0}")]
	Password(String),
	/// The configuration is unusable.
	#[error("Invalid configuration: {0}")]
	Config(String),
	/// Reading a local file, such as a trust store, failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error("Directory operation failed: {0}")]
	Ldap(#[from] ldap3::LdapError),
}
