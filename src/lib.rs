//! Read, search and synchronize identity records with LDAP directory servers
//! and Active Directory.
//!
//! The library turns structured queries into search filters, materializes
//! search results into [`Identity`] records, and writes records back by
//! diffing them against the live entry, so an update only touches the
//! attributes that changed. How records are written depends on the
//! [`Dialect`] of the server: standards-based servers take attributes as they
//! are, Active Directory gets account control bitmasks filled in, updates
//! restricted to a list of syncable attributes and passwords encoded for
//! `unicodePwd`.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource. The site
//! "firstyear's blog-a-log" also has [a guide][firstyear] which is more
//! visually oriented and goes into more detail about searching
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//! [firstyear]: https://fy.blackhats.net.au/blog/html/pages/ldap_guide_part_1_foundations.html
//!
//! # Getting started
//! A minimal example of synchronizing a user might look like so:
//! ```no_run
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use ldap_identity::{
//!     config::{BindCredentials, Config},
//!     Combinator, ConditionType, Identity, Query, Reader, Writer,
//! };
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let mut config = Config::new("ldap.example.org", "dc=example,dc=org");
//! config.bind = Some(BindCredentials::new("cn=admin,dc=example,dc=org", "verysecret"));
//!
//! // Search below the organizational unit named "people"
//! let mut reader = Reader::from_config(&config);
//! let query = Query::new(Combinator::And)
//!     .with(ConditionType::Branch, "ou", "people")
//!     .condition("objectClass", "person")
//!     .with(ConditionType::StartsWith, "uid", "jo");
//! for user in reader.search(query)? {
//!     println!("{user}");
//! }
//!
//! let mut user = Identity::new("uid=jdoe,ou=people,dc=example,dc=org");
//! user.set_attribute_values("objectClass", ["top", "person", "inetOrgPerson"]);
//! user.set_attribute("cn", "John Doe");
//! user.set_attribute("sn", "Doe");
//!
//! let mut writer = Writer::from_config(&config);
//! if reader.check_entry(user.id())? {
//!     writer.update_entry(&user)?;
//! } else {
//!     writer.add_entry(&user)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * The API is blocking. Every operation opens a connection and closes it
//!   before returning; run operations on separate [`Session`]s to run them
//!   concurrently.
//! * Pooling is a hint only, no connections are kept between operations.
//! * Only simple binds are supported.
//! * Setting a password on Active Directory takes a second request after the
//!   entry is created. If the process dies between the two, the entry is left
//!   without a password.
//! * [secrecy](https://docs.rs/secrecy) is not used for storing the bind
//!   password, it probably should be

pub mod auth;
pub mod config;
pub mod dialect;
pub mod entry;
pub mod error;
pub mod filter;
pub mod identity;
pub mod query;
pub mod reader;
pub mod session;
#[cfg(test)]
mod testing;
pub mod writer;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	auth::Authenticator,
	config::{Config, ConnectionConfig, SearchScope},
	dialect::Dialect,
	entry::{Projection, SearchEntryExt},
	error::Error,
	identity::{Identity, IdentityKind, Value},
	query::{Combinator, Condition, ConditionType, Query, QueryItem},
	reader::Reader,
	session::{AccessMode, Directory, Modification, SearchRequest, Session},
	writer::Writer,
};
