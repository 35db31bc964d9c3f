//! Creating, synchronizing and removing entries.
use tracing::{debug, info, warn};

use crate::{
	config::{Config, SearchScope},
	dialect::Dialect,
	entry::{same_dn, split_rdn, Projection},
	error::Error,
	filter::{MATCH_ALL, NO_ATTRIBUTES},
	identity::{Identity, Value},
	reader::read_entry,
	session::{scoped, AccessMode, Directory, Modification, SearchRequest, Session},
};

/// Writes entries, following the encoding rules of a [`Dialect`].
///
/// Every operation opens a read-write session, and closes it again before
/// returning, whether the operation succeeded or not.
#[derive(Debug)]
pub struct Writer<D: Directory = Session> {
	/// Session used for every operation
	directory: D,
	/// Encoding rules of the server
	dialect: Dialect,
}

impl Writer<Session> {
	/// Create a writer with a session built from the configuration.
	#[must_use]
	pub fn from_config(config: &Config) -> Self {
		Writer::new(Session::from_config(config), config.dialect.clone())
	}
}

/// Reject empty arguments.
fn require(value: &str, what: &str) -> Result<(), Error> {
	if value.trim().is_empty() {
		return Err(Error::InvalidArgument(format!("empty {what}")));
	}
	Ok(())
}

/// Set a password on an entry, removing the entry again if that fails.
fn set_password<D: Directory + ?Sized>(
	directory: &mut D,
	dn: &str,
	modifications: &[Modification],
) -> Result<(), Error> {
	if let Err(err) = directory.modify(dn, modifications) {
		warn!(dn = %dn, "Setting the password failed, removing the entry");
		if let Err(cleanup) = directory.delete(dn) {
			warn!(dn = %dn, "Removing the entry failed: {cleanup}");
		}
		return Err(Error::Password(err.to_string()));
	}
	debug!(dn = %dn, "Password set");
	Ok(())
}

/// Remove an entry after removing everything below it.
///
/// Names returned by the server are passed back verbatim, so characters such
/// as `/` need no escaping.
fn delete_subtree<D: Directory + ?Sized>(directory: &mut D, dn: &str) -> Result<(), Error> {
	let children = SearchRequest::new(dn, SearchScope::OneLevel, MATCH_ALL).attributes([NO_ATTRIBUTES]);
	for child in directory.search(&children)? {
		delete_subtree(directory, &child.dn)?;
	}
	directory.delete(dn)
}

/// Read the given attribute of an entry that has to exist.
fn existing<D: Directory + ?Sized>(
	directory: &mut D,
	dn: &str,
	attribute: &str,
) -> Result<Identity, Error> {
	read_entry(directory, dn, &[attribute], &Projection::new())?
		.ok_or_else(|| Error::EntryNotFound(dn.to_owned()))
}

impl<D: Directory> Writer<D> {
	/// Create a writer.
	pub fn new(directory: D, dialect: Dialect) -> Self {
		Self { directory, dialect }
	}

	/// The underlying session.
	pub fn directory(&self) -> &D {
		&self.directory
	}

	/// The underlying session, mutably, e.g. to change its settings.
	pub fn directory_mut(&mut self) -> &mut D {
		&mut self.directory
	}

	/// The encoding rules in use.
	pub fn dialect(&self) -> &Dialect {
		&self.dialect
	}

	/// Create an entry with the attributes of the record.
	///
	/// On Active Directory, a password is set by a second request once the
	/// entry exists. If that request fails, the entry is removed again and
	/// [`Error::Password`] is returned.
	pub fn add_entry(&mut self, entry: &Identity) -> Result<(), Error> {
		require(entry.id(), "entry name")?;
		let plan = self.dialect.encode_add(entry)?;
		let dn = entry.id();

		scoped(&mut self.directory, AccessMode::ReadWrite, |directory| {
			directory.add(dn, &plan.attributes)?;
			info!(dn = %dn, attributes = plan.attributes.len(), "Added entry");
			if !plan.password.is_empty() {
				set_password(directory, dn, &plan.password)?;
			}
			Ok(())
		})
	}

	/// Bring an existing entry to the state of the record with a single
	/// modify request holding the minimal modifications.
	///
	/// On Active Directory only syncable attributes are touched, and a
	/// password is set by a separate request first. If setting it fails, the
	/// entry is removed and [`Error::Password`] is returned.
	pub fn update_entry(&mut self, entry: &Identity) -> Result<(), Error> {
		require(entry.id(), "entry name")?;
		let dn = entry.id();
		let dialect = &self.dialect;

		scoped(&mut self.directory, AccessMode::ReadWrite, |directory| {
			let live = read_entry(directory, dn, &["*"], &Projection::new())?
				.ok_or_else(|| Error::EntryNotFound(dn.to_owned()))?;
			let plan = dialect.encode_update(entry, &live)?;

			if !plan.password.is_empty() {
				set_password(directory, dn, &plan.password)?;
			}
			if plan.modifications.is_empty() {
				debug!(dn = %dn, "Entry is up to date");
				return Ok(());
			}
			directory.modify(dn, &plan.modifications)?;
			info!(dn = %dn, modifications = plan.modifications.len(), "Updated entry");
			Ok(())
		})
	}

	/// Remove an entry.
	pub fn remove_entry(&mut self, dn: &str) -> Result<(), Error> {
		require(dn, "entry name")?;
		scoped(&mut self.directory, AccessMode::ReadWrite, |directory| {
			directory.delete(dn)?;
			info!(dn = %dn, "Removed entry");
			Ok(())
		})
	}

	/// Remove an entry and everything below it, deepest entries first.
	pub fn remove_tree(&mut self, dn: &str) -> Result<(), Error> {
		require(dn, "entry name")?;
		scoped(&mut self.directory, AccessMode::ReadWrite, |directory| {
			delete_subtree(directory, dn)?;
			info!(dn = %dn, "Removed tree");
			Ok(())
		})
	}

	/// Add a value to an attribute unless it is already present.
	pub fn add_entry_attribute(
		&mut self,
		dn: &str,
		attribute: &str,
		value: impl Into<Value>,
	) -> Result<(), Error> {
		require(dn, "entry name")?;
		require(attribute, "attribute name")?;
		let value = value.into();

		scoped(&mut self.directory, AccessMode::ReadWrite, |directory| {
			let live = existing(directory, dn, attribute)?;
			let modification = match live.attribute(attribute) {
				None => Modification::Add(attribute.to_owned(), vec![value]),
				Some(values) if values.iter().any(|present| present.matches(&value)) => {
					debug!(dn = %dn, "Value of {attribute} already present");
					return Ok(());
				}
				Some(values) => {
					let mut values = values.to_vec();
					values.push(value);
					Modification::Replace(attribute.to_owned(), values)
				}
			};
			directory.modify(dn, &[modification])
		})
	}

	/// Add a value to an attribute without checking the entry first.
	pub fn add_entry_attribute_unchecked(
		&mut self,
		dn: &str,
		attribute: &str,
		value: impl Into<Value>,
	) -> Result<(), Error> {
		require(dn, "entry name")?;
		require(attribute, "attribute name")?;
		let modification = Modification::Add(attribute.to_owned(), vec![value.into()]);

		scoped(&mut self.directory, AccessMode::ReadWrite, |directory| {
			directory.modify(dn, &[modification])
		})
	}

	/// Remove a single value of an attribute, keeping its other values.
	pub fn remove_entry_attribute_value(
		&mut self,
		dn: &str,
		attribute: &str,
		value: impl Into<Value>,
	) -> Result<(), Error> {
		require(dn, "entry name")?;
		require(attribute, "attribute name")?;
		let value = value.into();

		scoped(&mut self.directory, AccessMode::ReadWrite, |directory| {
			if !existing(directory, dn, attribute)?.has_attribute(attribute) {
				return Err(Error::AttributeNotFound {
					dn: dn.to_owned(),
					attribute: attribute.to_owned(),
				});
			}
			directory.modify(dn, &[Modification::Remove(attribute.to_owned(), vec![value])])
		})
	}

	/// Set all values of an attribute. An empty list removes the attribute.
	pub fn update_entry_attribute<V: Into<Value>>(
		&mut self,
		dn: &str,
		attribute: &str,
		values: impl IntoIterator<Item = V>,
	) -> Result<(), Error> {
		require(dn, "entry name")?;
		require(attribute, "attribute name")?;
		let values: Vec<Value> = values.into_iter().map(Into::into).collect();

		scoped(&mut self.directory, AccessMode::ReadWrite, |directory| {
			let present = existing(directory, dn, attribute)?.has_attribute(attribute);
			let modification = match (present, values.is_empty()) {
				(false, true) => return Ok(()),
				(true, true) => Modification::Remove(attribute.to_owned(), Vec::new()),
				(true, false) => Modification::Replace(attribute.to_owned(), values),
				(false, false) => Modification::Add(attribute.to_owned(), values),
			};
			directory.modify(dn, &[modification])
		})
	}

	/// Rename an entry, moving it if the parent of the new name differs.
	pub fn rename_entry(&mut self, dn: &str, new_dn: &str) -> Result<(), Error> {
		require(dn, "entry name")?;
		require(new_dn, "new entry name")?;
		let (rdn, parent) = split_rdn(new_dn);
		let new_superior = match (parent, split_rdn(dn).1) {
			(Some(parent), Some(current)) if same_dn(parent, current) => None,
			(parent, _) => parent,
		};

		scoped(&mut self.directory, AccessMode::ReadWrite, |directory| {
			directory.rename(dn, rdn, new_superior)?;
			info!(dn = %dn, new_dn = %new_dn, "Renamed entry");
			Ok(())
		})
	}
}
