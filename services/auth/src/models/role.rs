//! Role model and organizational scoping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::UserId;

/// Roles known to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleName {
    /// Full control over the service
    SuperAdmin,
    /// Manages a whole organizational unit
    Curator,
    /// Works inside a sub-unit or leaf unit
    Operator,
}

impl RoleName {
    /// Get the role name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleName::SuperAdmin => "super_admin",
            RoleName::Curator => "curator",
            RoleName::Operator => "operator",
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "super_admin" | "superadmin" => Ok(RoleName::SuperAdmin),
            "curator" => Ok(RoleName::Curator),
            "operator" => Ok(RoleName::Operator),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Position of a grant in the organizational hierarchy
///
/// An absent level matches anything beneath the nearest present ancestor and
/// hides every level below it, so a scope without `unit` is global.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_unit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_unit: Option<i64>,
}

/// Scoping carried inside access tokens so downstream services can filter
/// without another lookup
pub type TokenContext = Scope;

impl Scope {
    pub const GLOBAL: Scope = Scope {
        unit: None,
        sub_unit: None,
        leaf_unit: None,
    };

    pub fn new(unit: Option<i64>, sub_unit: Option<i64>, leaf_unit: Option<i64>) -> Self {
        Self {
            unit,
            sub_unit,
            leaf_unit,
        }
    }

    /// The scope with every level below the first absent one cleared
    ///
    /// `(None, Some(7), None)` is global and `(Some(3), None, Some(9))` is
    /// the whole of unit 3.
    pub fn effective(&self) -> Scope {
        let unit = self.unit;
        let sub_unit = unit.and(self.sub_unit);
        let leaf_unit = sub_unit.and(self.leaf_unit);
        Scope {
            unit,
            sub_unit,
            leaf_unit,
        }
    }

    pub fn is_global(&self) -> bool {
        self.unit.is_none()
    }

    /// Whether a grant with this scope reaches a resource located at `target`
    pub fn covers(&self, target: &Scope) -> bool {
        fn level(grant: Option<i64>, target: Option<i64>) -> bool {
            match grant {
                None => true,
                Some(id) => target == Some(id),
            }
        }

        let (grant, target) = (self.effective(), target.effective());
        level(grant.unit, target.unit)
            && level(grant.sub_unit, target.sub_unit)
            && level(grant.leaf_unit, target.leaf_unit)
    }

    /// Human readable label used by permission listings
    pub fn label(&self) -> String {
        if self.is_global() {
            return "global".to_string();
        }

        let scope = self.effective();
        let mut parts = Vec::with_capacity(3);
        if let Some(id) = scope.unit {
            parts.push(format!("unit {}", id));
        }
        if let Some(id) = scope.sub_unit {
            parts.push(format!("sub-unit {}", id));
        }
        if let Some(id) = scope.leaf_unit {
            parts.push(format!("leaf-unit {}", id));
        }
        parts.join(" / ")
    }
}

/// A role granted to a user within a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub id: i64,
    pub user_id: UserId,
    pub role: RoleName,
    pub scope: Scope,
    pub assigned_at: DateTime<Utc>,
}

/// New role grant payload
#[derive(Debug, Clone, PartialEq)]
pub struct NewRoleGrant {
    pub user_id: UserId,
    pub role: RoleName,
    pub scope: Scope,
}

/// Role grant as presented by permission listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleGrantView {
    pub id: i64,
    pub role: RoleName,
    pub scope: Scope,
    pub scope_label: String,
    pub assigned_at: DateTime<Utc>,
}

impl From<&RoleGrant> for RoleGrantView {
    fn from(grant: &RoleGrant) -> Self {
        Self {
            id: grant.id,
            role: grant.role,
            scope: grant.scope,
            scope_label: grant.scope.label(),
            assigned_at: grant.assigned_at,
        }
    }
}
