//! Config for the directory client.
use std::{fmt, fs::File, io::BufReader, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use ldap3::{LdapConnSettings, Scope};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{dialect::Dialect, error::Error};

/// Configuration for which variant of ISO8601 to use for parsing and
/// serializing time. Configured according the syntax definition
/// `( 1.3.6.1.4.1.1466.115.121.1.24 DESC 'Generalized Time' )` described in
/// RFC4517 section 3.1.13
pub const TIME_FORMAT: &[time::format_description::FormatItem] =
	time::macros::format_description!("[year][month][day][hour][minute][second]Z");

/// Default port for plain connections
pub const DEFAULT_PORT: u16 = 389;
/// Default port for TLS connections
pub const DEFAULT_SECURE_PORT: u16 = 636;
/// Count limit sentinel meaning "no limit"
pub const UNLIMITED: i32 = -1;

/// Directory client configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
	/// Connection settings.
	pub connection: ConnectionConfig,
	/// Credentials used to bind sessions. Sessions bind anonymously if unset.
	#[serde(default)]
	pub bind: Option<BindCredentials>,
	/// The search base for readers
	pub base_dn: String,
	/// How deep searches descend below the base
	#[serde(default)]
	pub scope: SearchScope,
	/// Maximum number of entries a search returns, or [`UNLIMITED`]
	#[serde(default = "default_count_limit")]
	pub count_limit: i32,
	/// Encoding rules of the directory server
	#[serde(default)]
	pub dialect: Dialect,
	/// Locale used to order results of sorted searches, as a BCP-47 tag
	#[serde(default = "default_sort_locale")]
	pub sort_locale: String,
	/// Attribute holding the login name of users, used for authentication
	#[serde(default)]
	pub user_id_attribute: Option<String>,
}

/// Default for [`Config::count_limit`]
fn default_count_limit() -> i32 {
	UNLIMITED
}

/// Default for [`Config::sort_locale`]
fn default_sort_locale() -> String {
	"und".to_owned()
}

impl Config {
	/// Create a configuration with default settings for the given server and
	/// search base.
	#[must_use]
	pub fn new(host: impl Into<String>, base_dn: impl Into<String>) -> Self {
		Self {
			connection: ConnectionConfig::new(host),
			bind: None,
			base_dn: base_dn.into(),
			scope: SearchScope::default(),
			count_limit: UNLIMITED,
			dialect: Dialect::default(),
			sort_locale: default_sort_locale(),
			user_id_attribute: None,
		}
	}
}

/// Distinguished name and password of the account sessions bind as.
#[derive(Deserialize, Serialize, Clone)]
pub struct BindCredentials {
	/// Distinguished name of the account
	pub dn: String,
	/// Password of the account
	pub password: String,
}

impl BindCredentials {
	/// Create credentials for a simple bind.
	#[must_use]
	pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
		Self { dn: dn.into(), password: password.into() }
	}
}

impl fmt::Debug for BindCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BindCredentials").field("dn", &self.dn).finish_non_exhaustive()
	}
}

/// Configuration for how to connect to the directory server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Server name or address
	pub host: String,

	/// Server port. Defaults to 389, or 636 for secure connections.
	#[serde(default)]
	pub port: Option<u16>,

	/// Timeout to establish a connection in seconds.
	#[serde(default = "default_timeout")]
	pub timeout: u64,

	/// TLS config
	#[serde(default)]
	pub tls: TlsConfig,

	/// Ask the transport to keep connections around for reuse
	#[serde(default)]
	pub pooling: bool,
}

/// Default for [`ConnectionConfig::timeout`]
fn default_timeout() -> u64 {
	30
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TlsConfig {
	/// Connect with TLS on a dedicated port
	#[serde(default)]
	pub secure: bool,

	/// PEM file with the certificates to trust. Without one, the server
	/// certificate is accepted without verification.
	#[serde(default)]
	pub trust_store: Option<PathBuf>,
}

impl ConnectionConfig {
	/// Create a plain connection configuration for the given host.
	#[must_use]
	pub fn new(host: impl Into<String>) -> Self {
		Self {
			host: host.into(),
			port: None,
			timeout: default_timeout(),
			tls: TlsConfig::default(),
			pooling: false,
		}
	}

	/// The port to connect to.
	#[must_use]
	pub fn effective_port(&self) -> u16 {
		match self.port {
			Some(port) => port,
			None if self.tls.secure => DEFAULT_SECURE_PORT,
			None => DEFAULT_PORT,
		}
	}

	/// The URL of the server, `ldap://host:port` or `ldaps://host:port`.
	pub fn url(&self) -> Result<Url, Error> {
		let scheme = if self.tls.secure { "ldaps" } else { "ldap" };
		let url = format!("{scheme}://{}:{}", self.host, self.effective_port());
		Url::parse(&url).map_err(|err| Error::Config(format!("invalid server URL {url}: {err}")))
	}

	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));

		if self.tls.secure {
			match &self.tls.trust_store {
				Some(path) => {
					let mut reader = BufReader::new(File::open(path)?);
					let certificates = rustls_pemfile::certs(&mut reader)?;
					let mut roots = rustls::RootCertStore::empty();
					let (added, _ignored) = roots.add_parsable_certificates(&certificates);
					if added == 0 {
						return Err(Error::Config(format!(
							"no usable certificate in trust store {}",
							path.display()
						)));
					}
					let config = rustls::ClientConfig::builder()
						.with_safe_defaults()
						.with_root_certificates(roots)
						.with_no_client_auth();
					settings = settings.set_config(Arc::new(config));
				}
				None => settings = settings.set_no_tls_verify(true),
			}
		}
		Ok(settings)
	}
}

/// How deep a search descends below its base.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
	/// Only the base entry itself
	Object,
	/// Direct children of the base
	OneLevel,
	/// The base and everything below it
	#[default]
	Subtree,
}

impl From<SearchScope> for Scope {
	fn from(scope: SearchScope) -> Self {
		match scope {
			SearchScope::Object => Scope::Base,
			SearchScope::OneLevel => Scope::OneLevel,
			SearchScope::Subtree => Scope::Subtree,
		}
	}
}

impl FromStr for SearchScope {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"object" | "base" => Ok(SearchScope::Object),
			"one_level" | "onelevel" | "one" => Ok(SearchScope::OneLevel),
			"subtree" | "sub" => Ok(SearchScope::Subtree),
			_ => Err(Error::InvalidScope(s.to_owned())),
		}
	}
}

impl TryFrom<i32> for SearchScope {
	type Error = Error;

	/// Numeric scopes as used by the protocol: 0 object, 1 one level, 2
	/// subtree.
	fn try_from(value: i32) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(SearchScope::Object),
			1 => Ok(SearchScope::OneLevel),
			2 => Ok(SearchScope::Subtree),
			_ => Err(Error::InvalidScope(value.to_string())),
		}
	}
}
