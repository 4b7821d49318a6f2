use serde::Serialize;

use paygate_auth::{Entitlement, PermissionSet};

/// JSON view of a verified credential's grants.
#[derive(Debug, Serialize)]
pub struct PermissionsView {
    pub encoded: u64,
    pub grants: Vec<Entitlement>,
}

impl From<&PermissionSet> for PermissionsView {
    fn from(p: &PermissionSet) -> Self {
        Self {
            encoded: p.bits(),
            grants: p.grants().collect(),
        }
    }
}
