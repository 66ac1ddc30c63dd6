//! Parent-certificate sources.
//!
//! A [`CertificateSource`] answers three questions: does it hold a given
//! certificate, which parents can it produce for one, and which usage
//! constraints it attaches to a certificate it returned. Lookups complete
//! either synchronously ([`ParentFetch::Ready`]) or deferred
//! ([`ParentFetch::Pending`]); a deferred lookup is resolved later through
//! `PathBuilder::provide_parents` with the issued ticket.
//!
//! Variants:
//! - [`MemoryCertificateSource`] — subject/key-id indexed in-memory store
//! - [`AnchorSource`] — constraint-attached anchor store (system or user role)
//! - [`ItemStoreSource`] — item store scoped by access groups
//! - [`LegacyKeychainSource`] — unscoped item store, legacy search semantics
//! - [`CaIssuerSource`] — network AIA fetch placeholder, always defers

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::certificate::{Certificate, CertificateId, DistinguishedName};

// ---------------------------------------------------------------------------
// Usage constraints
// ---------------------------------------------------------------------------

/// Trust disposition a source attaches to a certificate it vouches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrustDisposition {
    /// May terminate a chain as a trusted root.
    TrustRoot,
    /// Trusted only when used directly as a leaf.
    TrustAsLeaf,
    /// Explicitly distrusted.
    Deny,
    /// Present without an explicit disposition.
    Unspecified,
}

impl fmt::Display for TrustDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustRoot => write!(f, "trust_root"),
            Self::TrustAsLeaf => write!(f, "trust_as_leaf"),
            Self::Deny => write!(f, "deny"),
            Self::Unspecified => write!(f, "unspecified"),
        }
    }
}

/// One usage-constraint entry attached to a certificate by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageConstraint {
    pub trust: TrustDisposition,
    /// Constraint applies only when evaluating this policy oid, if set.
    pub policy_scope: Option<String>,
}

impl UsageConstraint {
    pub fn trust_root() -> Self {
        Self {
            trust: TrustDisposition::TrustRoot,
            policy_scope: None,
        }
    }

    pub fn deny() -> Self {
        Self {
            trust: TrustDisposition::Deny,
            policy_scope: None,
        }
    }
}

/// Anchoring decision from a constraint list. An empty list is an
/// unconstrained anchor; any `Deny` entry forbids anchoring; otherwise a
/// `TrustRoot` entry is required.
pub fn anchor_trust_permitted(constraints: &[UsageConstraint]) -> bool {
    if constraints.is_empty() {
        return true;
    }
    if constraints
        .iter()
        .any(|c| c.trust == TrustDisposition::Deny)
    {
        return false;
    }
    constraints
        .iter()
        .any(|c| c.trust == TrustDisposition::TrustRoot)
}

// ---------------------------------------------------------------------------
// Source interface
// ---------------------------------------------------------------------------

/// Which anchor store a source represents, when it is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnchorRole {
    System,
    User,
}

impl fmt::Display for AnchorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Ticket identifying one outstanding deferred parent lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FetchTicket(pub u64);

/// Outcome of a parent lookup. `Ready(None)` is the "source could not
/// perform the lookup" completion; `Ready(Some(vec))` may be empty.
#[derive(Debug, Clone)]
pub enum ParentFetch {
    Ready(Option<Vec<Arc<Certificate>>>),
    Pending(FetchTicket),
}

/// Polymorphic parent-certificate capability.
///
/// Implementations own only their lookup state, never the certificates they
/// return; those are shared. A deferred `copy_parents` must eventually be
/// answered exactly once through the builder's resume entry point, possibly
/// with `None`.
pub trait CertificateSource {
    fn name(&self) -> &str;

    fn contains(&self, cert: &Certificate) -> bool;

    fn copy_parents(&mut self, cert: &Arc<Certificate>, ticket: FetchTicket) -> ParentFetch;

    fn usage_constraints(&self, _cert: &Certificate) -> Option<Vec<UsageConstraint>> {
        None
    }

    /// Narrow lookups to the given access groups. Sources without group
    /// scoping ignore the call.
    fn restrict_access_groups(&mut self, _groups: &[String]) {}

    fn anchor_role(&self) -> Option<AnchorRole> {
        None
    }

    fn is_anchor_source(&self) -> bool {
        self.anchor_role().is_some()
    }
}

// ---------------------------------------------------------------------------
// MemoryCertificateSource
// ---------------------------------------------------------------------------

/// Subject-name indexed in-memory store. The input-certificate array of a
/// build becomes one of these.
#[derive(Debug, Default)]
pub struct MemoryCertificateSource {
    by_subject: BTreeMap<DistinguishedName, Vec<Arc<Certificate>>>,
    ids: BTreeMap<CertificateId, ()>,
}

impl MemoryCertificateSource {
    pub fn new(certs: impl IntoIterator<Item = Arc<Certificate>>) -> Self {
        let mut source = Self::default();
        for cert in certs {
            source.insert(cert);
        }
        source
    }

    pub fn insert(&mut self, cert: Arc<Certificate>) {
        if self.ids.insert(cert.id(), ()).is_none() {
            self.by_subject
                .entry(cert.subject.clone())
                .or_default()
                .push(cert);
        }
    }

    fn parents_of(&self, cert: &Certificate) -> Vec<Arc<Certificate>> {
        self.by_subject
            .get(&cert.issuer)
            .map(|candidates| {
                candidates
                    .iter()
                    .filter(|parent| cert.issued_by(parent))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl CertificateSource for MemoryCertificateSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn contains(&self, cert: &Certificate) -> bool {
        self.ids.contains_key(&cert.id())
    }

    fn copy_parents(&mut self, cert: &Arc<Certificate>, _ticket: FetchTicket) -> ParentFetch {
        ParentFetch::Ready(Some(self.parents_of(cert)))
    }
}

// ---------------------------------------------------------------------------
// AnchorSource
// ---------------------------------------------------------------------------

/// Anchor store with per-certificate usage constraints. Explicit
/// configuration object; there is no process-wide singleton.
#[derive(Debug)]
pub struct AnchorSource {
    role: AnchorRole,
    store: MemoryCertificateSource,
    constraints: BTreeMap<CertificateId, Vec<UsageConstraint>>,
}

impl AnchorSource {
    pub fn new(role: AnchorRole) -> Self {
        Self {
            role,
            store: MemoryCertificateSource::default(),
            constraints: BTreeMap::new(),
        }
    }

    pub fn system() -> Self {
        Self::new(AnchorRole::System)
    }

    pub fn user() -> Self {
        Self::new(AnchorRole::User)
    }

    pub fn add_anchor(&mut self, cert: Arc<Certificate>, constraints: Vec<UsageConstraint>) {
        if !constraints.is_empty() {
            self.constraints.insert(cert.id(), constraints);
        }
        self.store.insert(cert);
    }

    pub fn role(&self) -> AnchorRole {
        self.role
    }
}

impl CertificateSource for AnchorSource {
    fn name(&self) -> &str {
        match self.role {
            AnchorRole::System => "anchor_system",
            AnchorRole::User => "anchor_user",
        }
    }

    fn contains(&self, cert: &Certificate) -> bool {
        self.store.contains(cert)
    }

    fn copy_parents(&mut self, cert: &Arc<Certificate>, ticket: FetchTicket) -> ParentFetch {
        self.store.copy_parents(cert, ticket)
    }

    fn usage_constraints(&self, cert: &Certificate) -> Option<Vec<UsageConstraint>> {
        self.constraints.get(&cert.id()).cloned()
    }

    fn anchor_role(&self) -> Option<AnchorRole> {
        Some(self.role)
    }
}

// ---------------------------------------------------------------------------
// ItemStoreSource / LegacyKeychainSource
// ---------------------------------------------------------------------------

/// Item store scoped by access groups: every item is tagged with the group
/// it was stored under, and lookups see only the groups currently in scope.
/// An absent scope means every group; a present scope lists the visible
/// groups, and a present-but-empty one leaves nothing visible. Only
/// consulted when the build allows keychain-style stores.
#[derive(Debug, Default)]
pub struct ItemStoreSource {
    scope: Option<Vec<String>>,
    items: BTreeMap<String, Vec<Arc<Certificate>>>,
}

impl ItemStoreSource {
    pub fn new(access_groups: Vec<String>) -> Self {
        Self {
            scope: if access_groups.is_empty() {
                None
            } else {
                Some(access_groups)
            },
            items: BTreeMap::new(),
        }
    }

    pub fn add_item(&mut self, access_group: impl Into<String>, cert: Arc<Certificate>) {
        self.items.entry(access_group.into()).or_default().push(cert);
    }

    fn in_scope(&self, group: &str) -> bool {
        match &self.scope {
            None => true,
            Some(groups) => groups.iter().any(|g| g == group),
        }
    }

    fn visible(&self) -> impl Iterator<Item = &Arc<Certificate>> {
        self.items
            .iter()
            .filter(|(group, _)| self.in_scope(group))
            .flat_map(|(_, certs)| certs.iter())
    }
}

impl CertificateSource for ItemStoreSource {
    fn name(&self) -> &str {
        "item_store"
    }

    fn contains(&self, cert: &Certificate) -> bool {
        self.visible().any(|item| item.id() == cert.id())
    }

    fn copy_parents(&mut self, cert: &Arc<Certificate>, _ticket: FetchTicket) -> ParentFetch {
        let mut seen = BTreeMap::new();
        let mut parents = Vec::new();
        for item in self.visible() {
            if cert.issued_by(item) && seen.insert(item.id(), ()).is_none() {
                parents.push(item.clone());
            }
        }
        ParentFetch::Ready(Some(parents))
    }

    fn restrict_access_groups(&mut self, groups: &[String]) {
        if groups.is_empty() {
            return;
        }
        match &mut self.scope {
            None => self.scope = Some(groups.to_vec()),
            // A disjoint intersection leaves nothing visible, never
            // everything.
            Some(existing) => existing.retain(|g| groups.contains(g)),
        }
    }
}

/// Unscoped item store with legacy search semantics: every stored item is
/// visible regardless of access group.
#[derive(Debug, Default)]
pub struct LegacyKeychainSource {
    index: MemoryCertificateSource,
}

impl LegacyKeychainSource {
    pub fn new(certs: impl IntoIterator<Item = Arc<Certificate>>) -> Self {
        Self {
            index: MemoryCertificateSource::new(certs),
        }
    }
}

impl CertificateSource for LegacyKeychainSource {
    fn name(&self) -> &str {
        "legacy_keychain"
    }

    fn contains(&self, cert: &Certificate) -> bool {
        self.index.contains(cert)
    }

    fn copy_parents(&mut self, cert: &Arc<Certificate>, ticket: FetchTicket) -> ParentFetch {
        self.index.copy_parents(cert, ticket)
    }
}

// ---------------------------------------------------------------------------
// CaIssuerSource
// ---------------------------------------------------------------------------

/// Network CA-Issuers (AIA) fetch seam. Every lookup defers; the embedder
/// performs the fetch and resumes the builder with the result. Tracks a
/// fetched-certificate budget so unbounded fan-out stays bounded on the
/// network side too.
#[derive(Debug)]
pub struct CaIssuerSource {
    fetch_budget: usize,
    issued: Vec<FetchTicket>,
}

impl CaIssuerSource {
    pub const DEFAULT_FETCH_BUDGET: usize = 64;

    pub fn new() -> Self {
        Self {
            fetch_budget: Self::DEFAULT_FETCH_BUDGET,
            issued: Vec::new(),
        }
    }

    pub fn with_budget(fetch_budget: usize) -> Self {
        Self {
            fetch_budget,
            issued: Vec::new(),
        }
    }

    /// Tickets handed out so far, in issue order.
    pub fn issued_tickets(&self) -> &[FetchTicket] {
        &self.issued
    }
}

impl Default for CaIssuerSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateSource for CaIssuerSource {
    fn name(&self) -> &str {
        "ca_issuer_network"
    }

    fn contains(&self, _cert: &Certificate) -> bool {
        false
    }

    fn copy_parents(&mut self, _cert: &Arc<Certificate>, ticket: FetchTicket) -> ParentFetch {
        if self.issued.len() >= self.fetch_budget {
            return ParentFetch::Ready(None);
        }
        self.issued.push(ticket);
        ParentFetch::Pending(ticket)
    }
}
