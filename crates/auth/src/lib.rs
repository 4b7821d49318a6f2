//! `paygate-auth`: permission encoding and the authorization decision.
//!
//! This crate is intentionally decoupled from any server or client: it sees
//! requests only through `http` types and never performs I/O.

pub mod authorize;
pub mod credential;
pub mod permissions;
pub mod routes;

pub use authorize::{AuthorizationEngine, Denial, DenialKind, ExpandPolicy, Grant, RequestFacts};
pub use credential::{CredentialError, SigningKey};
pub use permissions::{AccessLevel, Entitlement, PermissionError, PermissionSet, ResourceKind};
pub use routes::{RouteTable, RouteTableError, classify_access};
