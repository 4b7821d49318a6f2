//! Bit-packed permission grants.
//!
//! A [`PermissionSet`] is a single `u64` holding a 2-bit [`AccessLevel`] per
//! [`ResourceKind`]: bits `2k` and `2k + 1` belong to the resource with id `k`.
//! The layout is part of every issued credential, so resource ids are
//! append-only.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the encoded permission word, in bytes.
pub const ENCODED_LEN: usize = 8;

/// Number of resource slots a 64-bit word can hold at 2 bits each.
pub const MAX_RESOURCES: u8 = (u64::BITS / 2) as u8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission payload must be 8 bytes, got {0}")]
    InvalidLength(usize),

    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("unknown access level '{0}'")]
    UnknownAccess(String),

    #[error("grant must look like '<access>:<resource>', got '{0}'")]
    InvalidGrant(String),
}

/// Upstream API resource family.
///
/// Discriminants are the wire identifiers. Never renumber or reuse one;
/// new resources are appended with the next free id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ResourceKind {
    /// Wildcard: a grant here satisfies checks against any resource.
    All = 0,

    // Core resources
    Balance = 1,
    Charges = 2,
    Customers = 3,
    Disputes = 4,
    Events = 5,
    FileUploads = 6,
    Refunds = 7,
    Tokens = 8,
    Transfers = 9,
    TransferReversals = 10,

    // Connect resources
    Accounts = 11,
    ApplicationFeeRefunds = 12,
    ApplicationFees = 13,
    Recipients = 14,
    CountrySpecs = 15,
    ExternalAccounts = 16,

    // Payment methods
    Sources = 17,

    // Relay resources
    Orders = 18,
    OrderReturns = 19,
    Products = 20,
    Skus = 21,

    // Subscription resources
    Coupons = 22,
    Invoices = 23,
    InvoiceItems = 24,
    Plans = 25,
    Subscriptions = 26,
    SubscriptionItems = 27,

    // Radar resources
    RadarReviews = 28,
    RadarRules = 29,
}

impl ResourceKind {
    /// Every known resource, indexed by id.
    pub const KNOWN: [ResourceKind; 30] = [
        ResourceKind::All,
        ResourceKind::Balance,
        ResourceKind::Charges,
        ResourceKind::Customers,
        ResourceKind::Disputes,
        ResourceKind::Events,
        ResourceKind::FileUploads,
        ResourceKind::Refunds,
        ResourceKind::Tokens,
        ResourceKind::Transfers,
        ResourceKind::TransferReversals,
        ResourceKind::Accounts,
        ResourceKind::ApplicationFeeRefunds,
        ResourceKind::ApplicationFees,
        ResourceKind::Recipients,
        ResourceKind::CountrySpecs,
        ResourceKind::ExternalAccounts,
        ResourceKind::Sources,
        ResourceKind::Orders,
        ResourceKind::OrderReturns,
        ResourceKind::Products,
        ResourceKind::Skus,
        ResourceKind::Coupons,
        ResourceKind::Invoices,
        ResourceKind::InvoiceItems,
        ResourceKind::Plans,
        ResourceKind::Subscriptions,
        ResourceKind::SubscriptionItems,
        ResourceKind::RadarReviews,
        ResourceKind::RadarRules,
    ];

    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::KNOWN.get(usize::from(id)).copied()
    }

    pub fn is_wildcard(self) -> bool {
        self == ResourceKind::All
    }

    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::All => "all",
            ResourceKind::Balance => "balance",
            ResourceKind::Charges => "charges",
            ResourceKind::Customers => "customers",
            ResourceKind::Disputes => "disputes",
            ResourceKind::Events => "events",
            ResourceKind::FileUploads => "file_uploads",
            ResourceKind::Refunds => "refunds",
            ResourceKind::Tokens => "tokens",
            ResourceKind::Transfers => "transfers",
            ResourceKind::TransferReversals => "transfer_reversals",
            ResourceKind::Accounts => "accounts",
            ResourceKind::ApplicationFeeRefunds => "application_fee_refunds",
            ResourceKind::ApplicationFees => "application_fees",
            ResourceKind::Recipients => "recipients",
            ResourceKind::CountrySpecs => "country_specs",
            ResourceKind::ExternalAccounts => "external_accounts",
            ResourceKind::Sources => "sources",
            ResourceKind::Orders => "orders",
            ResourceKind::OrderReturns => "order_returns",
            ResourceKind::Products => "products",
            ResourceKind::Skus => "skus",
            ResourceKind::Coupons => "coupons",
            ResourceKind::Invoices => "invoices",
            ResourceKind::InvoiceItems => "invoice_items",
            ResourceKind::Plans => "plans",
            ResourceKind::Subscriptions => "subscriptions",
            ResourceKind::SubscriptionItems => "subscription_items",
            ResourceKind::RadarReviews => "radar_reviews",
            ResourceKind::RadarRules => "radar_rules",
        }
    }
}

// Ids must be dense, stable and fit in the permission word. Growing past
// `MAX_RESOURCES` needs a wider encoding, not a wraparound.
const _: () = {
    let mut i = 0;
    while i < ResourceKind::KNOWN.len() {
        let id = ResourceKind::KNOWN[i] as u8;
        assert!(id as usize == i, "resource ids must match their KNOWN index");
        assert!(id < MAX_RESOURCES, "resource id exceeds permission word capacity");
        i += 1;
    }
};

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceKind {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if wanted == "*" {
            return Ok(ResourceKind::All);
        }
        Self::KNOWN
            .iter()
            .copied()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| PermissionError::UnknownResource(s.to_string()))
    }
}

/// 2-bit access flag. `ReadWrite` is the union of `Read` and `Write`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AccessLevel {
    None = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl AccessLevel {
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Decode the low two bits of `bits`.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => AccessLevel::None,
            1 => AccessLevel::Read,
            2 => AccessLevel::Write,
            _ => AccessLevel::ReadWrite,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::ReadWrite => "read_write",
        }
    }
}

impl core::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AccessLevel {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(AccessLevel::None),
            "read" | "r" => Ok(AccessLevel::Read),
            "write" | "w" => Ok(AccessLevel::Write),
            "read_write" | "readwrite" | "rw" => Ok(AccessLevel::ReadWrite),
            _ => Err(PermissionError::UnknownAccess(s.to_string())),
        }
    }
}

/// A single `(access, resource)` pair, as accepted by issuer tooling
/// (`read:customers`, `read_write:all`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub resource: ResourceKind,
    pub access: AccessLevel,
}

impl FromStr for Entitlement {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (access, resource) = s
            .split_once(':')
            .ok_or_else(|| PermissionError::InvalidGrant(s.to_string()))?;
        Ok(Self {
            access: access.parse()?,
            resource: resource.parse()?,
        })
    }
}

fn resource_mask(access: AccessLevel, resources: &[ResourceKind]) -> u64 {
    resources.iter().fold(0u64, |mask, resource| {
        mask | (u64::from(access.bits()) << (u32::from(resource.id()) * 2))
    })
}

/// Dense grant table, one [`AccessLevel`] per [`ResourceKind`].
///
/// Grants only accumulate: [`PermissionSet::set_access`] ORs bits in and
/// nothing clears them.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(u64);

impl PermissionSet {
    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn from_bits(encoded: u64) -> Self {
        Self(encoded)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Grant `access` on every resource in `resources`.
    pub fn set_access(&mut self, access: AccessLevel, resources: &[ResourceKind]) {
        self.0 |= resource_mask(access, resources);
    }

    pub fn with_access(mut self, access: AccessLevel, resources: &[ResourceKind]) -> Self {
        self.set_access(access, resources);
        self
    }

    /// True if every resource holds at least `access`, or the wildcard
    /// resource holds it.
    ///
    /// The check is a conjunction over the pairs: `can(ReadWrite, &[a, b])`
    /// needs both bits on `a` and both bits on `b`. An empty `resources`
    /// slice is vacuously satisfied.
    pub fn can(&self, access: AccessLevel, resources: &[ResourceKind]) -> bool {
        let mask = resource_mask(access, resources);
        let wildcard = resource_mask(access, &[ResourceKind::All]);
        mask & self.0 == mask || wildcard & self.0 == wildcard
    }

    /// Access explicitly recorded for `resource`, ignoring the wildcard.
    pub fn access_for(&self, resource: ResourceKind) -> AccessLevel {
        AccessLevel::from_bits((self.0 >> (u32::from(resource.id()) * 2)) as u8)
    }

    /// Every known resource with a non-empty grant, in id order.
    pub fn grants(&self) -> impl Iterator<Item = Entitlement> + '_ {
        ResourceKind::KNOWN.iter().filter_map(|&resource| {
            match self.access_for(resource) {
                AccessLevel::None => None,
                access => Some(Entitlement { resource, access }),
            }
        })
    }

    /// Big-endian 8-byte encoding.
    pub fn to_bytes(&self) -> [u8; ENCODED_LEN] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PermissionError> {
        let word: [u8; ENCODED_LEN] = bytes
            .try_into()
            .map_err(|_| PermissionError::InvalidLength(bytes.len()))?;
        Ok(Self(u64::from_be_bytes(word)))
    }
}

impl From<Entitlement> for PermissionSet {
    fn from(value: Entitlement) -> Self {
        PermissionSet::new().with_access(value.access, &[value.resource])
    }
}

impl FromIterator<Entitlement> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Entitlement>>(iter: T) -> Self {
        iter.into_iter().fold(PermissionSet::new(), |set, e| {
            set.with_access(e.access, &[e.resource])
        })
    }
}
