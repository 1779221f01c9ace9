//! Permission encoding and matching
//!
//! A permission string has the canonical form
//! `Service::OwnershipLevel::Action::Segment{::Segment}*`:
//!
//! - `Maestro::RL::ListSchedulers::sniper-3d::*`
//! - `Will.IAM::RO::EditRole::*`
//!
//! The ownership level is `RO` (owner, may exercise and re-grant) or `RL`
//! (lender, may only exercise). The final resource segment may be `*`,
//! covering that segment and everything beneath it.
//!
//! # Examples
//!
//! ```
//! use will_iam_authz::permission::Permission;
//!
//! let grant: Permission = "Maestro::RO::ListSchedulers::sniper-3d::*".parse().unwrap();
//! let wanted: Permission = "Maestro::RL::ListSchedulers::sniper-3d::na".parse().unwrap();
//! assert!(wanted.is_present(&[grant]));
//! ```

use crate::error::{PermissionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between permission parts and resource segments
pub const SEPARATOR: &str = "::";

/// Matches any service, action or resource subtree
pub const WILDCARD: &str = "*";

/// Holding rights over an action on a resource
///
/// `Lender < Owner`: an owner grant satisfies a lender requirement, never
/// the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnershipLevel {
    /// Can exercise the permission and grant it to others (`RO`)
    #[serde(rename = "RO")]
    Owner,
    /// Can only exercise the permission (`RL`)
    #[serde(rename = "RL")]
    Lender,
}

impl OwnershipLevel {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "RO",
            Self::Lender => "RL",
        }
    }

    /// True only for `Lender.less(Owner)`
    pub fn less(&self, other: &OwnershipLevel) -> bool {
        matches!((self, other), (Self::Lender, Self::Owner))
    }
}

impl FromStr for OwnershipLevel {
    type Err = PermissionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RO" => Ok(Self::Owner),
            "RL" => Ok(Self::Lender),
            other => Err(PermissionError::InvalidOwnershipLevel(other.to_string())),
        }
    }
}

impl fmt::Display for OwnershipLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-defined verb; `*` matches any action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this action matches every action
    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered path of resource segments, e.g. `maestro::sniper-3d::na::*`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceHierarchy {
    segments: Vec<String>,
}

impl ResourceHierarchy {
    /// Builds a hierarchy from already split segments
    pub fn from_segments<I, S>(segments: I) -> std::result::Result<Self, PermissionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(PermissionError::EmptySegment);
        }
        Ok(Self { segments })
    }

    /// The `*` hierarchy, covering every resource
    pub fn all() -> Self {
        Self {
            segments: vec![WILDCARD.to_string()],
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether this is exactly `*`
    pub fn is_wildcard(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == WILDCARD
    }

    /// Whether the last segment is `*`
    pub fn is_open(&self) -> bool {
        self.segments.last().map(|s| s == WILDCARD).unwrap_or(false)
    }

    /// Checks whether `self` covers `other`
    ///
    /// Segments are compared in order; a `*` in `self` matches the rest of
    /// `other`. Without a wildcard both hierarchies must be identical.
    pub fn contains(&self, other: &ResourceHierarchy) -> bool {
        if self.segments.len() > other.segments.len() {
            return false;
        }

        for (i, other_seg) in other.segments.iter().enumerate() {
            let Some(seg) = self.segments.get(i) else {
                // self exhausted without a wildcard
                return false;
            };
            if seg == WILDCARD {
                return true;
            }
            if seg != other_seg {
                return false;
            }
        }

        true
    }
}

impl FromStr for ResourceHierarchy {
    type Err = PermissionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_segments(s.split(SEPARATOR))
    }
}

impl TryFrom<String> for ResourceHierarchy {
    type Error = PermissionError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ResourceHierarchy> for String {
    fn from(rh: ResourceHierarchy) -> Self {
        rh.to_string()
    }
}

impl fmt::Display for ResourceHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(SEPARATOR))
    }
}

/// Ownership level of an action over a resource, optionally bound to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// Storage identifier, absent until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Role holding this permission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,

    /// Service permission name, or `*`
    pub service: String,

    pub ownership_level: OwnershipLevel,

    pub action: Action,

    pub resource_hierarchy: ResourceHierarchy,

    /// Human readable name shown in permission pickers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Permission {
    /// Creates an unbound permission
    pub fn new(
        service: impl Into<String>,
        ownership_level: OwnershipLevel,
        action: impl Into<Action>,
        resource_hierarchy: ResourceHierarchy,
    ) -> Self {
        Self {
            id: None,
            role_id: None,
            service: service.into(),
            ownership_level,
            action: action.into(),
            resource_hierarchy,
            alias: None,
        }
    }

    /// Parses a permission string
    ///
    /// Fails when there are fewer than four parts, the ownership level is not
    /// `RO`/`RL`, or any part is empty.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        if parts.len() < 4 {
            return Err(PermissionError::Incomplete.into());
        }

        let ownership_level: OwnershipLevel = parts[1].parse()?;

        if parts.iter().any(|p| p.is_empty()) {
            return Err(PermissionError::EmptySegment.into());
        }

        Ok(Self::new(
            parts[0],
            ownership_level,
            Action::new(parts[2]),
            ResourceHierarchy::from_segments(parts[3..].iter().copied())?,
        ))
    }

    pub fn with_role(mut self, role_id: impl Into<String>) -> Self {
        self.role_id = Some(role_id.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_ownership_level(mut self, ownership_level: OwnershipLevel) -> Self {
        self.ownership_level = ownership_level;
        self
    }

    /// Checks whether some grant satisfies this permission
    pub fn is_present(&self, grants: &[Permission]) -> bool {
        grants.iter().any(|grant| grant.satisfies(self))
    }

    /// Checks whether this grant satisfies `candidate`
    pub fn satisfies(&self, candidate: &Permission) -> bool {
        (self.service == WILDCARD || self.service == candidate.service)
            && (self.action.is_wildcard() || self.action == candidate.action)
            && !self.ownership_level.less(&candidate.ownership_level)
            && self.resource_hierarchy.contains(&candidate.resource_hierarchy)
    }

    /// Any action over any resource of its service
    pub fn has_service_full_access(&self) -> bool {
        self.action.is_wildcard() && self.resource_hierarchy.is_wildcard()
    }

    /// Full access held as owner
    pub fn has_service_full_ownership(&self) -> bool {
        self.has_service_full_access() && self.ownership_level == OwnershipLevel::Owner
    }
}

impl FromStr for Permission {
    type Err = crate::error::IamError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.service,
            self.ownership_level,
            self.action,
            self.resource_hierarchy,
            sep = SEPARATOR
        )
    }
}

/// Formats a permission on this service's own namespace
pub fn self_permission(level: OwnershipLevel, action: &str, resource: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}{sep}{}",
        crate::SERVICE_NAME,
        level,
        action,
        resource,
        sep = SEPARATOR
    )
}

/// Lender permission on this service's own namespace
pub fn self_lender_permission(action: &str, resource: &str) -> String {
    self_permission(OwnershipLevel::Lender, action, resource)
}

/// Owner permission on this service's own namespace
pub fn self_owner_permission(action: &str, resource: &str) -> String {
    self_permission(OwnershipLevel::Owner, action, resource)
}
