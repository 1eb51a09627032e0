pub mod engine;
pub mod errors;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Guard scope for admin panel permissions. Permissions held under any
/// other guard never grant panel access.
pub const ADMIN_GUARD: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Employee,
    Department,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Employee => "employee",
            Resource::Department => "department",
        }
    }
}

/// Canonical permission key, e.g. `employee-delete`.
pub fn permission_name(resource: Resource, action: Action) -> String {
    format!("{}-{}", resource.as_str(), action.as_str())
}

/// Explicit permission snapshot for one actor under one guard. Loaded
/// per request and passed by the caller; there is no process-global
/// permission cache to invalidate.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    guard: String,
    names: HashSet<String>,
}

impl PermissionSet {
    pub fn new(guard: impl Into<String>, names: impl IntoIterator<Item = String>) -> Self {
        Self {
            guard: guard.into(),
            names: names.into_iter().collect(),
        }
    }

    pub fn guard(&self) -> &str {
        &self.guard
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn grants(&self, resource: Resource, action: Action, guard: &str) -> bool {
        self.guard == guard && self.names.contains(&permission_name(resource, action))
    }
}

/// Tagged actor variant. Admins carry a permission snapshot; plain
/// users share the session infrastructure but never reach the panel.
#[derive(Debug, Clone)]
pub enum Principal {
    Admin {
        id: i64,
        name: String,
        permissions: PermissionSet,
    },
    User {
        id: i64,
    },
}

impl Principal {
    pub fn can_access_admin_panel(&self) -> bool {
        matches!(self, Principal::Admin { .. })
    }
}
