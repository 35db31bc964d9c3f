//! Simple bind authentication of directory users.
use tracing::{debug, info};

use crate::{
	config::Config,
	error::Error,
	query::Query,
	reader::Reader,
	session::Session,
};

/// Verifies user passwords by binding as the user.
///
/// The user entry is looked up with the service credentials of the reader's
/// session, by an exact match on the user id attribute.
#[derive(Debug)]
pub struct Authenticator {
	/// Reader used to find user entries
	reader: Reader<Session>,
	/// Attribute holding the login name
	user_id_attribute: String,
}

impl Authenticator {
	/// Create an authenticator finding users by `user_id_attribute`.
	pub fn new(reader: Reader<Session>, user_id_attribute: impl Into<String>) -> Self {
		Self { reader, user_id_attribute: user_id_attribute.into() }
	}

	/// Create an authenticator from the configuration, which has to name the
	/// user id attribute.
	pub fn from_config(config: &Config) -> Result<Self, Error> {
		let attribute = config
			.user_id_attribute
			.clone()
			.ok_or_else(|| Error::Config("no user id attribute configured".to_owned()))?;
		Ok(Self::new(Reader::from_config(config), attribute))
	}

	/// Check the password of a user, returning the name of the user's entry.
	///
	/// Empty passwords are rejected, since a simple bind with an empty
	/// password is an anonymous bind and always succeeds.
	pub fn authenticate(&mut self, user: &str, password: &str) -> Result<String, Error> {
		if user.trim().is_empty() {
			return Err(Error::InvalidArgument("empty user name".to_owned()));
		}
		if password.is_empty() {
			return Err(Error::InvalidArgument("empty password".to_owned()));
		}

		let query = Query::default().literal(self.user_id_attribute.as_str(), user);
		let dn = self
			.reader
			.search_dn(query, Some(1))?
			.into_iter()
			.next()
			.ok_or_else(|| Error::EntryNotFound("user not found".to_owned()))?;
		debug!(dn = %dn, "Binding as user");

		self.reader.directory().authenticate(&dn, password)?;
		info!(dn = %dn, "User authenticated");
		Ok(dn)
	}

	/// The reader used to find user entries.
	#[must_use]
	pub fn reader(&self) -> &Reader<Session> {
		&self.reader
	}

	/// Whether the user exists.
	pub fn user_exists(&mut self, user: &str) -> Result<bool, Error> {
		let query = Query::default().literal(self.user_id_attribute.as_str(), user);
		self.reader.check_search(query)
	}
}
