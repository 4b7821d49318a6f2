use paygate_auth::{AccessLevel, Grant, ResourceKind};

/// Authorization outcome attached to a forwarded request.
///
/// Inserted by the authorization middleware; present on every request that
/// reaches the forwarding handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GrantContext {
    resource: ResourceKind,
    access: AccessLevel,
}

impl GrantContext {
    pub fn new(resource: ResourceKind, access: AccessLevel) -> Self {
        Self { resource, access }
    }

    pub fn resource(&self) -> ResourceKind {
        self.resource
    }

    pub fn access(&self) -> AccessLevel {
        self.access
    }
}

impl From<&Grant> for GrantContext {
    fn from(grant: &Grant) -> Self {
        Self::new(grant.resource, grant.access)
    }
}
