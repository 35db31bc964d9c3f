//! Encoding rules of directory servers, and the attribute diff shared by all of
//! them.
//!
//! Every [`Dialect`] supplies three encodings: how a new entry is created
//! ([`Dialect::encode_add`]), how a live entry is brought to a desired state
//! ([`Dialect::encode_update`]) and how passwords are set
//! ([`Dialect::encode_password`]).
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
	entry::{MODIFY_TIMESTAMP, OBJECT_CLASS},
	error::Error,
	identity::{Identity, Value},
	session::Modification,
};

/// Binary password attribute of Active Directory
pub const UNICODE_PWD: &str = "unicodePwd";
/// Password attribute of standards-based servers
pub const USER_PASSWORD: &str = "userPassword";
/// Active Directory attribute forcing a password change at next logon when `0`
pub const PWD_LAST_SET: &str = "pwdLastSet";
/// Active Directory account control bitmask
pub const USER_ACCOUNT_CONTROL: &str = "userAccountControl";
/// Active Directory group type bitmask
pub const GROUP_TYPE: &str = "groupType";

/// `userAccountControl` flag: the account is disabled
pub const UF_ACCOUNTDISABLE: u32 = 0x0000_0002;
/// `userAccountControl` flag: no password is required
pub const UF_PASSWD_NOTREQD: u32 = 0x0000_0020;
/// `userAccountControl` flag: the user cannot change the password
pub const UF_PASSWD_CANT_CHANGE: u32 = 0x0000_0040;
/// `userAccountControl` flag: a regular user account
pub const UF_NORMAL_ACCOUNT: u32 = 0x0000_0200;
/// `userAccountControl` flag: the password never expires
pub const UF_DONT_EXPIRE_PASSWD: u32 = 0x0001_0000;
/// `userAccountControl` flag: the password has expired
pub const UF_PASSWORD_EXPIRED: u32 = 0x0080_0000;

/// `groupType` flag: a global group
pub const GROUP_TYPE_GLOBAL_GROUP: u32 = 0x0000_0002;
/// `groupType` flag: a security group
pub const GROUP_TYPE_SECURITY_ENABLED: u32 = 0x8000_0000;

/// Attributes synchronized with Active Directory unless configured otherwise
pub const SYNCABLE_ATTRIBUTES: &[&str] = &[
	"givenname",
	"sn",
	"samaccountname",
	"description",
	"title",
	"postalcode",
	"street",
	"streetaddress",
	"mail",
	"l",
	"st",
	"c",
	"physicaldeliveryofficename",
	"telephonenumber",
	"facsimiletelephonenumber",
	"otherfacsimiletelephonenumber",
	"mobile",
	"pager",
	"otherpager",
	"iphone",
	"otheriphone",
	"company",
	"department",
	"homedirectory",
	"homedrive",
	"profilepath",
	"scriptpath",
	"homephone",
	"comment",
	"manager",
	"employeeid",
	"employeetype",
	"useraccountcontrol",
	"extensionattribute1",
	"extensionattribute2",
	"extensionattribute3",
	"extensionattribute4",
	"extensionattribute5",
	"extensionattribute6",
	"extensionattribute7",
	"extensionattribute8",
	"extensionattribute9",
	"extensionattribute10",
	"extensionattribute11",
	"extensionattribute12",
	"extensionattribute13",
	"extensionattribute14",
	"extensionattribute15",
	"extensionattribute16",
	"extensionattribute17",
	"extensionattribute18",
	"extensionattribute19",
	"extensionattribute20",
	"extensionattribute21",
	"extensionattribute22",
	"extensionattribute23",
	"extensionattribute24",
	"homemdb",
	"homemta",
	"legacyexchangedn",
	"mailnickname",
	"mdbusedefaults",
	"msexchhomeservername",
	"msexchversion",
	"msexchmailboxguid",
	"msexchrecipientdisplaytype",
	"msexchrecipienttypedetails",
	"msexchhidefromaddresslists",
	"msexchpoliciesincluded",
	"msexchpoliciesexcluded",
	"proxyaddresses",
	"pwdlastset",
	"lockouttime",
	"homepostaladdress",
];

/// Attributes that take a single value on Active Directory even when several
/// are supplied
const FIRST_VALUE_ONLY: &[&str] = &["telephonenumber"];

/// Rules of the Active Directory dialect.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ActiveDirectoryRules {
	/// Attributes updates may touch; others are left alone
	#[serde(default = "default_syncable_attributes")]
	pub syncable_attributes: Vec<String>,
}

/// Default for [`ActiveDirectoryRules::syncable_attributes`]
fn default_syncable_attributes() -> Vec<String> {
	SYNCABLE_ATTRIBUTES.iter().map(|name| (*name).to_owned()).collect()
}

impl Default for ActiveDirectoryRules {
	fn default() -> Self {
		Self { syncable_attributes: default_syncable_attributes() }
	}
}

impl ActiveDirectoryRules {
	/// Whether updates may touch the attribute.
	#[must_use]
	pub fn is_syncable(&self, name: &str) -> bool {
		self.syncable_attributes.iter().any(|syncable| syncable.eq_ignore_ascii_case(name))
	}
}

/// Schema and encoding conventions of a directory server.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
	/// Standards-based server such as OpenLDAP
	#[default]
	Generic,
	/// Active Directory, with account control bitmasks and binary passwords
	ActiveDirectory(ActiveDirectoryRules),
}

/// Requests creating an entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddPlan {
	/// Attributes of the add request
	pub attributes: Vec<(String, Vec<Value>)>,
	/// Modifications setting the password once the entry exists
	pub password: Vec<Modification>,
}

/// Requests bringing a live entry to a desired state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePlan {
	/// Modifications of the single update request
	pub modifications: Vec<Modification>,
	/// Modifications of the separate password request
	pub password: Vec<Modification>,
}

impl UpdatePlan {
	/// Whether the live entry already has the desired state.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.modifications.is_empty() && self.password.is_empty()
	}
}

/// Whether the attribute carries a password.
fn is_password(name: &str) -> bool {
	name.eq_ignore_ascii_case(UNICODE_PWD) || name.eq_ignore_ascii_case(USER_PASSWORD)
}

/// Whether the desired record's object classes contain the class.
fn has_object_class(identity: &Identity, class: &str) -> bool {
	identity.has_attribute_value(OBJECT_CLASS, class)
}

impl Dialect {
	/// Encode the creation of the desired record.
	pub fn encode_add(&self, desired: &Identity) -> Result<AddPlan, Error> {
		match self {
			Dialect::Generic => Ok(AddPlan {
				attributes: desired
					.attributes()
					.iter()
					.filter(|(name, _)| name.as_str() != MODIFY_TIMESTAMP)
					.map(|(name, values)| (name.clone(), values.clone()))
					.collect(),
				password: Vec::new(),
			}),
			Dialect::ActiveDirectory(_) => {
				let mut attributes: Vec<(String, Vec<Value>)> = desired
					.attributes()
					.iter()
					.filter(|(name, _)| name.as_str() != MODIFY_TIMESTAMP && !is_password(name))
					.filter_map(|(name, values)| {
						let values: Vec<Value> = values
							.iter()
							.filter(|value| value.as_str() != Some(""))
							.cloned()
							.collect();
						(!values.is_empty()).then(|| (name.clone(), values))
					})
					.collect();

				if has_object_class(desired, "user") {
					if !desired.has_attribute(USER_ACCOUNT_CONTROL) {
						let control = UF_NORMAL_ACCOUNT | UF_PASSWD_NOTREQD | UF_DONT_EXPIRE_PASSWD;
						attributes.push((
							USER_ACCOUNT_CONTROL.to_owned(),
							vec![Value::String(control.to_string())],
						));
					}
				} else if has_object_class(desired, "group") && !desired.has_attribute(GROUP_TYPE) {
					attributes.push((GROUP_TYPE.to_owned(), vec![Value::String(default_group_type())]));
				}

				let mut password = self.encode_password(desired)?;
				if !password.is_empty() && desired.first_str(PWD_LAST_SET) == Some("0") {
					password.push(Modification::Replace(
						PWD_LAST_SET.to_owned(),
						vec![Value::from("0")],
					));
				}
				Ok(AddPlan { attributes, password })
			}
		}
	}

	/// Encode the minimal modifications bringing `live` to the desired state.
	pub fn encode_update(&self, desired: &Identity, live: &Identity) -> Result<UpdatePlan, Error> {
		match self {
			Dialect::Generic => Ok(UpdatePlan {
				modifications: diff(
					desired,
					live,
					|name| name != MODIFY_TIMESTAMP,
					|_, values| values.to_vec(),
				),
				password: Vec::new(),
			}),
			Dialect::ActiveDirectory(rules) => Ok(UpdatePlan {
				modifications: diff(
					desired,
					live,
					|name| rules.is_syncable(name) && !is_password(name),
					|name, values| {
						let count = if FIRST_VALUE_ONLY.contains(&name) { 1 } else { values.len() };
						values.iter().take(count).map(substitute_empty).collect()
					},
				),
				password: self.encode_password(desired)?,
			}),
		}
	}

	/// Encode setting the password carried by the desired record, if the
	/// dialect sets passwords separately from other attributes.
	///
	/// Active Directory takes the first value of `unicodePwd`, or of
	/// `userPassword` when absent, as a `unicodePwd` replacement. Standards
	/// based servers write passwords like any other attribute.
	pub fn encode_password(&self, desired: &Identity) -> Result<Vec<Modification>, Error> {
		if *self == Dialect::Generic {
			return Ok(Vec::new());
		}
		let password =
			desired.first_value(UNICODE_PWD).or_else(|| desired.first_value(USER_PASSWORD));
		let password = match password {
			None => return Ok(Vec::new()),
			Some(Value::String(password)) => password.clone(),
			Some(Value::Bytes(bytes)) => String::from_utf8(bytes.clone())
				.map_err(|err| Error::Password(format!("password is not valid UTF-8: {err}")))?,
			Some(other) => {
				return Err(Error::Password(format!("unsupported password value {other}")));
			}
		};
		if password.is_empty() {
			return Ok(Vec::new());
		}
		Ok(vec![Modification::Replace(
			UNICODE_PWD.to_owned(),
			vec![Value::Bytes(encode_password(&password))],
		)])
	}
}

/// `groupType` of a global security group, as the signed decimal Active
/// Directory expects.
fn default_group_type() -> String {
	i32::from_ne_bytes((GROUP_TYPE_SECURITY_ENABLED | GROUP_TYPE_GLOBAL_GROUP).to_ne_bytes())
		.to_string()
}

/// Active Directory rejects empty strings; they are written as a single space.
fn substitute_empty(value: &Value) -> Value {
	match value.as_str() {
		Some("" | "null") => Value::from(" "),
		_ => value.clone(),
	}
}

/// Encode a password for `unicodePwd`: the password in double quotes, as
/// UTF-16 little endian.
#[must_use]
pub fn encode_password(password: &str) -> Vec<u8> {
	format!("\"{password}\"").encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Whether two value lists hold the same values, in any order. Textual values
/// are compared without regard to case.
#[must_use]
pub fn same_values(desired: &[Value], live: &[Value]) -> bool {
	if desired.len() != live.len() {
		return false;
	}
	let mut used = vec![false; live.len()];
	desired.iter().all(|value| {
		let found = live
			.iter()
			.enumerate()
			.position(|(index, candidate)| !used[index] && value.matches(candidate));
		match found {
			Some(index) => {
				used[index] = true;
				true
			}
			None => false,
		}
	})
}

/// The minimal modifications turning `live` into `desired`, restricted to the
/// attributes `syncable` accepts.
///
/// Attributes present on both sides are replaced if their values differ,
/// attributes only present on the live entry are removed and attributes only
/// present on the desired record are added. `prepare` maps desired values to
/// the form written before comparing.
fn diff(
	desired: &Identity,
	live: &Identity,
	syncable: impl Fn(&str) -> bool,
	prepare: impl Fn(&str, &[Value]) -> Vec<Value>,
) -> Vec<Modification> {
	let mut pending: BTreeMap<&str, &[Value]> = desired
		.attributes()
		.iter()
		.filter(|(name, _)| syncable(name))
		.map(|(name, values)| (name.as_str(), values.as_slice()))
		.collect();

	let mut modifications = Vec::new();
	for (name, current) in live.attributes() {
		if !syncable(name) {
			continue;
		}
		match pending.remove(name.as_str()) {
			Some(values) => {
				let values = prepare(name, values);
				if !same_values(&values, current) {
					modifications.push(Modification::Replace(name.clone(), values));
				}
			}
			None => modifications.push(Modification::Remove(name.clone(), Vec::new())),
		}
	}
	for (name, values) in pending {
		let values = prepare(name, values);
		if !values.is_empty() {
			modifications.push(Modification::Add(name.to_owned(), values));
		}
	}
	modifications
}
