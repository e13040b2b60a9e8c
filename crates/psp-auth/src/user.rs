//! Identity and role accessors over a token's claims

use std::fmt;

use serde_json::{Map, Value};

/// Where a role is granted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Realm-wide role, from `realm_access.roles`
    Global,
    /// Role on a named client, from `resource_access.<name>.roles`
    Client(String),
}

impl Resource {
    /// Resource named `name`; `"global"` denotes realm roles
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == "global" {
            Self::Global
        } else {
            Self::Client(name)
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Client(name) => f.write_str(name),
        }
    }
}

/// A role on a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleRef {
    /// Where the role is granted
    pub resource: Resource,
    /// Role name
    pub role: String,
}

impl RoleRef {
    /// Realm-wide role
    pub fn global(role: impl Into<String>) -> Self {
        Self {
            resource: Resource::Global,
            role: role.into(),
        }
    }

    /// Role on client `resource`; `"global"` denotes a realm role
    pub fn client(resource: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            resource: Resource::named(resource),
            role: role.into(),
        }
    }
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.role)
    }
}

/// Borrowed view of the token subject
#[derive(Debug, Clone, Copy)]
pub struct User<'a> {
    claims: &'a Map<String, Value>,
    resource: &'a str,
}

impl<'a> User<'a> {
    pub(crate) fn new(claims: &'a Map<String, Value>, resource: &'a str) -> Self {
        Self { claims, resource }
    }

    fn str_claim(&self, name: &str) -> Option<&'a str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Stable subject identifier (`sub`)
    pub fn id(&self) -> Option<&'a str> {
        self.str_claim("sub")
    }

    /// `preferred_username`
    ///
    /// May change over the account's lifetime; key data on [`id`](Self::id).
    pub fn username(&self) -> Option<&'a str> {
        self.str_claim("preferred_username")
    }

    /// `name`
    pub fn full_name(&self) -> Option<&'a str> {
        self.str_claim("name")
    }

    /// `given_name`
    pub fn given_name(&self) -> Option<&'a str> {
        self.str_claim("given_name")
    }

    /// `family_name`
    pub fn family_name(&self) -> Option<&'a str> {
        self.str_claim("family_name")
    }

    /// `email`
    pub fn email(&self) -> Option<&'a str> {
        self.str_claim("email")
    }

    /// `email_verified`
    pub fn email_verified(&self) -> Option<bool> {
        self.claims.get("email_verified").and_then(Value::as_bool)
    }

    /// `upn`
    pub fn principal_name(&self) -> Option<&'a str> {
        self.str_claim("upn")
    }

    /// Client id the token was validated for
    pub fn resource(&self) -> &'a str {
        self.resource
    }

    fn roles(&self, resource: &Resource) -> Option<&'a Vec<Value>> {
        let access = match resource {
            Resource::Global => self.claims.get("realm_access")?,
            Resource::Client(name) => self.claims.get("resource_access")?.get(name)?,
        };
        access.get("roles")?.as_array()
    }

    /// Whether the role is granted; absent role claims mean no roles
    pub fn has_role(&self, role: &RoleRef) -> bool {
        self.roles(&role.resource)
            .is_some_and(|roles| roles.iter().any(|r| r.as_str() == Some(role.role.as_str())))
    }

    /// Whether at least one role is granted
    pub fn has_any_role(&self, roles: &[RoleRef]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }

    /// Whether every role is granted
    pub fn has_all_roles(&self, roles: &[RoleRef]) -> bool {
        roles.iter().all(|role| self.has_role(role))
    }

    /// Role names granted on `resource`
    pub fn role_names(&self, resource: &Resource) -> Vec<&'a str> {
        self.roles(resource)
            .map(|roles| roles.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}
