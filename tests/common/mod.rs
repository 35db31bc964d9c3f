use std::{collections::HashSet, error::Error};

use ldap3::{LdapConn, Mod};
use ldap_identity::{
	config::{BindCredentials, Config},
	Identity, Writer,
};

pub const BASE: &str = "dc=example,dc=org";
pub const OU: &str = "identities";

pub fn ou_dn() -> String {
	format!("ou={OU},{BASE}")
}

pub fn user_dn(uid: &str) -> String {
	format!("uid={uid},ou={OU},{BASE}")
}

pub fn config() -> Config {
	let mut config = Config::new("localhost", BASE);
	config.connection.port = Some(1389);
	config.connection.timeout = 5;
	config.bind = Some(BindCredentials::new("cn=admin,dc=example,dc=org", "adminpassword"));
	config.user_id_attribute = Some("uid".to_owned());
	config
}

pub fn ldap_connect() -> Result<LdapConn, Box<dyn Error>> {
	let mut ldap = LdapConn::new("ldap://localhost:1389")?;
	ldap.simple_bind("cn=admin,dc=example,dc=org", "adminpassword")?.success()?;
	Ok(ldap)
}

/// Remove what previous runs left behind and create an empty organizational
/// unit.
pub fn reset_organizational_unit() -> Result<(), Box<dyn Error>> {
	let mut writer = Writer::from_config(&config());
	let _ = writer.remove_tree(&ou_dn());

	let mut ldap = ldap_connect()?;
	ldap.add(
		&ou_dn(),
		vec![("objectClass", HashSet::from(["organizationalUnit"])), ("ou", HashSet::from([OU]))],
	)?
	.success()?;
	ldap.unbind()?;
	Ok(())
}

pub fn ldap_user_replace_attribute(
	uid: &str,
	attribute: &str,
	value: &str,
) -> Result<(), Box<dyn Error>> {
	let mut ldap = ldap_connect()?;
	ldap.modify(&user_dn(uid), vec![Mod::Replace(attribute, HashSet::from([value]))])?.success()?;
	ldap.unbind()?;
	Ok(())
}

pub fn person(uid: &str, cn: &str, sn: &str) -> Identity {
	let mut identity = Identity::new(user_dn(uid));
	identity.set_attribute_values(
		"objectClass",
		["top", "person", "organizationalPerson", "inetOrgPerson"],
	);
	identity.set_attribute("uid", uid);
	identity.set_attribute("cn", cn);
	identity.set_attribute("sn", sn);
	identity
}

pub fn init_tracing() {
	use tracing_subscriber::{filter::LevelFilter, EnvFilter};

	let tracing_filter = EnvFilter::default().add_directive(LevelFilter::DEBUG.into());
	let _ = tracing_subscriber::fmt().with_env_filter(tracing_filter).try_init();
}
