use crate::authz::errors::AuthzError;
use crate::authz::{permission_name, Action, Principal, Resource, ADMIN_GUARD};

/// Check whether `principal` may perform `action` on `resource`.
///
/// Non-admin principals are turned away before any permission lookup;
/// admins are checked against their permission snapshot under the
/// `admin` guard.
pub fn authorize(
    principal: &Principal,
    action: Action,
    resource: Resource,
) -> Result<(), AuthzError> {
    let permissions = match principal {
        Principal::Admin { permissions, .. } => permissions,
        Principal::User { .. } => return Err(AuthzError::PanelAccessDenied),
    };

    if permissions.grants(resource, action, ADMIN_GUARD) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            permission: permission_name(resource, action),
        })
    }
}
