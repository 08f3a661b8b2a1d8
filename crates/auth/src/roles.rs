//! Role-based access control.
//!
//! Roles form a fixed hierarchy `admin ⊃ premium ⊃ user ⊃ guest`: each role
//! inherits every permission of the roles below it. Permission checks are
//! set membership over the union of a user's roles.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use choir_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    User,
    Premium,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Premium => "premium",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "guest" => Some(Role::Guest),
            "user" => Some(Role::User),
            "premium" => Some(Role::Premium),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Permissions granted directly by this role (inheritance applied:
    /// each tier includes the sets below it).
    pub fn permissions(&self) -> HashSet<Permission> {
        use Permission::*;
        let mut set: HashSet<Permission> = match self {
            Role::Guest => [Read].into(),
            Role::User => [Read, Write, ApiAccess].into(),
            Role::Premium => [
                Read,
                Write,
                Delete,
                ApiAccess,
                ViewMetrics,
                ExportData,
                PluginAccess,
            ]
            .into(),
            Role::Admin => [
                Read,
                Write,
                Delete,
                ApiAccess,
                ViewMetrics,
                ExportData,
                PluginAccess,
                ManageUsers,
                ManageRoles,
                PluginManagement,
                SystemConfig,
            ]
            .into(),
        };
        // Hierarchy: make inheritance structural, not just by listing.
        if let Some(lower) = self.lower() {
            set.extend(lower.permissions());
        }
        set
    }

    fn lower(&self) -> Option<Role> {
        match self {
            Role::Admin => Some(Role::Premium),
            Role::Premium => Some(Role::User),
            Role::User => Some(Role::Guest),
            Role::Guest => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permissions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Delete,
    ApiAccess,
    ViewMetrics,
    ExportData,
    PluginAccess,
    ManageUsers,
    ManageRoles,
    PluginManagement,
    SystemConfig,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
            Permission::ApiAccess => "api_access",
            Permission::ViewMetrics => "view_metrics",
            Permission::ExportData => "export_data",
            Permission::PluginAccess => "plugin_access",
            Permission::ManageUsers => "manage_users",
            Permission::ManageRoles => "manage_roles",
            Permission::PluginManagement => "plugin_management",
            Permission::SystemConfig => "system_config",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The union of permissions across a user's roles.
pub fn permissions_of(roles: &[Role]) -> HashSet<Permission> {
    roles.iter().flat_map(|r| r.permissions()).collect()
}

pub fn has_permission(roles: &[Role], permission: Permission) -> bool {
    permissions_of(roles).contains(&permission)
}

pub fn has_any_permission(roles: &[Role], wanted: &[Permission]) -> bool {
    let granted = permissions_of(roles);
    wanted.iter().any(|p| granted.contains(p))
}

pub fn has_all_permissions(roles: &[Role], wanted: &[Permission]) -> bool {
    let granted = permissions_of(roles);
    wanted.iter().all(|p| granted.contains(p))
}

/// Errors with `InsufficientPermission` when the permission is missing.
pub fn require_permission(roles: &[Role], permission: Permission) -> Result<()> {
    if has_permission(roles, permission) {
        Ok(())
    } else {
        Err(Error::InsufficientPermission {
            permission: permission.as_str().to_owned(),
        })
    }
}

pub fn has_role(roles: &[Role], role: Role) -> bool {
    roles.contains(&role)
}
