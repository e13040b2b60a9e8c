//! Role and scope requirements evaluated against a validated token
//!
//! Evaluation is pure: no I/O, no mutation of the token.
//!
//! ```
//! use psp_auth::{Policy, Requirement};
//!
//! let policy = Policy::new()
//!     .require(Requirement::scopes(["read"]))
//!     .require(Requirement::any_role(["admin", "auditor"]));
//! assert_eq!(policy.requirements().len(), 2);
//! ```

use crate::error::{AuthError, Result};
use crate::token::Token;
use crate::user::{Resource, RoleRef};

/// A single authorization condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Every scope must be granted
    Scopes {
        /// Scope names as written by the route
        scopes: Vec<String>,
        /// Prefix each scope with `"<client_id>:"` before comparing
        namespaced: bool,
    },
    /// One role must be granted
    Role(RoleRef),
    /// At least one of the roles must be granted
    AnyRole(Vec<RoleRef>),
    /// Every role must be granted
    AllRoles(Vec<RoleRef>),
}

fn role_refs<I, S>(resource: &Resource, roles: I) -> Vec<RoleRef>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    roles
        .into_iter()
        .map(|role| RoleRef {
            resource: resource.clone(),
            role: role.into(),
        })
        .collect()
}

impl Requirement {
    /// Namespaced scopes
    pub fn scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Scopes {
            scopes: scopes.into_iter().map(Into::into).collect(),
            namespaced: true,
        }
    }

    /// Scopes compared verbatim
    pub fn raw_scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Scopes {
            scopes: scopes.into_iter().map(Into::into).collect(),
            namespaced: false,
        }
    }

    /// Global role
    pub fn role(role: impl Into<String>) -> Self {
        Self::Role(RoleRef::global(role))
    }

    /// Any of the global roles
    pub fn any_role<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyRole(role_refs(&Resource::Global, roles))
    }

    /// All of the global roles
    pub fn all_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllRoles(role_refs(&Resource::Global, roles))
    }

    /// Role on client `resource`
    pub fn resource_role(resource: impl Into<String>, role: impl Into<String>) -> Self {
        Self::Role(RoleRef::client(resource, role))
    }

    /// Any of the roles on client `resource`
    pub fn any_resource_role<I, S>(resource: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyRole(role_refs(&Resource::named(resource), roles))
    }

    /// All of the roles on client `resource`
    pub fn all_resource_roles<I, S>(resource: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllRoles(role_refs(&Resource::named(resource), roles))
    }

    /// Allow, or the reason for denial
    pub fn check(&self, token: &Token) -> Result<()> {
        let user = token.user();
        match self {
            Self::Scopes { scopes, namespaced } => match token.missing_scope(scopes, *namespaced) {
                Some(scope) => Err(AuthError::InsufficientScope { scope }),
                None => Ok(()),
            },
            Self::Role(role) => {
                if user.has_role(role) {
                    Ok(())
                } else {
                    Err(denied(role.resource.to_string(), [role]))
                }
            }
            Self::AnyRole(roles) => {
                if user.has_any_role(roles) {
                    Ok(())
                } else {
                    Err(denied(describe_resources(roles), roles))
                }
            }
            Self::AllRoles(roles) => match roles.iter().find(|role| !user.has_role(role)) {
                Some(missing) => Err(denied(missing.resource.to_string(), [missing])),
                None => Ok(()),
            },
        }
    }
}

fn denied<'a>(resource: String, roles: impl IntoIterator<Item = &'a RoleRef>) -> AuthError {
    AuthError::InsufficientRole {
        resource,
        roles: roles.into_iter().map(|r| r.role.clone()).collect(),
    }
}

/// Resource label for an any-of set, `a,b` when the roles span resources
fn describe_resources(roles: &[RoleRef]) -> String {
    let mut names: Vec<String> = Vec::new();
    for role in roles {
        let name = role.resource.to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names.join(",")
}

/// Conjunction of requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    requirements: Vec<Requirement>,
}

impl Policy {
    /// Empty policy; allows any authenticated token
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a requirement
    #[must_use]
    pub fn require(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// The requirements, in evaluation order
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Allow if every requirement holds; otherwise the first denial
    pub fn check(&self, token: &Token) -> Result<()> {
        self.requirements.iter().try_for_each(|r| r.check(token))
    }
}

impl From<Requirement> for Policy {
    fn from(requirement: Requirement) -> Self {
        Self::new().require(requirement)
    }
}

impl FromIterator<Requirement> for Policy {
    fn from_iter<I: IntoIterator<Item = Requirement>>(iter: I) -> Self {
        Self {
            requirements: iter.into_iter().collect(),
        }
    }
}
