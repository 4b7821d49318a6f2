//! Request classification: path → [`ResourceKind`], method → [`AccessLevel`].
//!
//! Routes are tried in order and the first match wins. [`RouteTable::new`]
//! rejects tables where an entry can never match because an earlier entry
//! already covers every path it would, so sub-resources have to be listed
//! before their parents.

use http::Method;
use thiserror::Error;

use crate::permissions::{AccessLevel, ResourceKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    #[error("route '{later}' is unreachable: '{earlier}' is listed first and matches everything it does")]
    Shadowed { earlier: String, later: String },

    #[error("route table must end with a '/' catch-all mapped to the wildcard resource")]
    MissingCatchAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

impl Segment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Segment::Literal(lit) => lit == segment,
            Segment::Param => !segment.is_empty(),
        }
    }

    fn covers(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Param, _) => true,
            (Segment::Literal(a), Segment::Literal(b)) => a == b,
            (Segment::Literal(_), Segment::Param) => false,
        }
    }
}

/// Segment-wise path prefix, e.g. `/v1/customers/{id}/sources`.
///
/// `{name}` matches any one non-empty segment. `/` has no segments and
/// matches every path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(raw: &str) -> Result<Self, RouteTableError> {
        let invalid = |reason| RouteTableError::InvalidPattern {
            pattern: raw.to_string(),
            reason,
        };

        let rest = raw.strip_prefix('/').ok_or_else(|| invalid("must start with '/'"))?;
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        let mut segments = Vec::new();
        if !rest.is_empty() {
            for part in rest.split('/') {
                if part.is_empty() {
                    return Err(invalid("empty path segment"));
                }
                let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    Some(name) if name.is_empty() => return Err(invalid("empty parameter name")),
                    Some(_) => Segment::Param,
                    None if part.contains(['{', '}']) => {
                        return Err(invalid("parameters must span a whole segment"));
                    }
                    None => Segment::Literal(part.to_string()),
                };
                segments.push(segment);
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_catch_all(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        self.segments
            .iter()
            .all(|segment| parts.next().is_some_and(|part| segment.matches(part)))
    }

    /// True if every path matched by `other` is also matched by `self`.
    fn covers(&self, other: &RoutePattern) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.covers(b))
    }
}

impl core::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRoute {
    pub pattern: RoutePattern,
    pub resource: ResourceKind,
}

/// Ordered, validated path → resource table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<ResourceRoute>,
}

impl RouteTable {
    pub fn new<'a>(
        routes: impl IntoIterator<Item = (&'a str, ResourceKind)>,
    ) -> Result<Self, RouteTableError> {
        let routes = routes
            .into_iter()
            .map(|(raw, resource)| {
                Ok(ResourceRoute {
                    pattern: RoutePattern::parse(raw)?,
                    resource,
                })
            })
            .collect::<Result<Vec<_>, RouteTableError>>()?;

        match routes.last() {
            Some(last) if last.pattern.is_catch_all() && last.resource.is_wildcard() => {}
            _ => return Err(RouteTableError::MissingCatchAll),
        }

        for (i, earlier) in routes.iter().enumerate() {
            if let Some(later) = routes[i + 1..]
                .iter()
                .find(|later| earlier.pattern.covers(&later.pattern))
            {
                return Err(RouteTableError::Shadowed {
                    earlier: earlier.pattern.to_string(),
                    later: later.pattern.to_string(),
                });
            }
        }

        Ok(Self { routes })
    }

    /// Upstream payment API routes.
    pub fn stripe_default() -> Result<Self, RouteTableError> {
        use crate::permissions::ResourceKind as R;

        Self::new([
            // Sub-resources first; their parents would otherwise match.
            ("/v1/customers/{cust_id}/sources", R::Sources),
            ("/v1/transfers/{transfer_id}/reversals", R::TransferReversals),
            ("/v1/application_fees/{fee_id}/refunds", R::ApplicationFeeRefunds),
            ("/v1/accounts/{account_id}/external_accounts", R::ExternalAccounts),
            // Core resources
            ("/v1/balance", R::Balance),
            ("/v1/charges", R::Charges),
            ("/v1/customers", R::Customers),
            ("/v1/disputes", R::Disputes),
            ("/v1/events", R::Events),
            ("/v1/files", R::FileUploads),
            ("/v1/refunds", R::Refunds),
            ("/v1/tokens", R::Tokens),
            ("/v1/transfers", R::Transfers),
            // Connect resources
            ("/v1/accounts", R::Accounts),
            ("/v1/application_fees", R::ApplicationFees),
            ("/v1/recipients", R::Recipients),
            ("/v1/country_specs", R::CountrySpecs),
            // Relay resources
            ("/v1/orders", R::Orders),
            ("/v1/order_returns", R::OrderReturns),
            ("/v1/products", R::Products),
            ("/v1/skus", R::Skus),
            // Subscription resources
            ("/v1/coupons", R::Coupons),
            ("/v1/invoices", R::Invoices),
            ("/v1/invoiceitems", R::InvoiceItems),
            ("/v1/plans", R::Plans),
            ("/v1/subscriptions", R::Subscriptions),
            ("/v1/subscription_items", R::SubscriptionItems),
            // Radar resources
            ("/v1/reviews", R::RadarReviews),
            ("/", R::All),
        ])
    }

    pub fn routes(&self) -> &[ResourceRoute] {
        &self.routes
    }

    /// Resource of the first matching route. Total: the validated table
    /// always ends in a catch-all.
    pub fn classify_resource(&self, path: &str) -> ResourceKind {
        self.routes
            .iter()
            .find(|route| route.pattern.matches(path))
            .map(|route| route.resource)
            .unwrap_or(ResourceKind::All)
    }
}

/// HTTP methods that exercise `access`.
pub fn methods_for(access: AccessLevel) -> &'static [&'static str] {
    match access {
        AccessLevel::Read => &["GET", "HEAD"],
        AccessLevel::Write => &["POST", "PUT", "PATCH", "DELETE"],
        AccessLevel::None | AccessLevel::ReadWrite => &[],
    }
}

/// Access level a request method requires; [`AccessLevel::None`] when the
/// method is in neither set.
pub fn classify_access(method: &Method) -> AccessLevel {
    [AccessLevel::Read, AccessLevel::Write]
        .into_iter()
        .find(|&access| methods_for(access).contains(&method.as_str()))
        .unwrap_or(AccessLevel::None)
}

/// True if `path` reaches the same resource whether or not a client, proxy
/// or upstream normalizes it.
///
/// Rejected: `.` and `..` segments (also percent-encoded, any case), empty
/// segments other than a single trailing slash, and backslashes or encoded
/// separators inside a segment.
pub fn is_canonical_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return path.is_empty();
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;

    segments.iter().enumerate().all(|(i, segment)| {
        if segment.is_empty() {
            return i == last;
        }
        let lower = segment.to_ascii_lowercase();
        if lower.contains('\\') || lower.contains("%2f") || lower.contains("%5c") {
            return false;
        }
        !matches!(lower.replace("%2e", ".").as_str(), "." | "..")
    })
}
