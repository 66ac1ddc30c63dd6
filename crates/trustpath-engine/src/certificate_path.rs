//! One candidate certification chain.
//!
//! A [`CertificatePath`] is an ordered certificate sequence, leaf at index 0
//! and root-most certificate last, plus the per-node usage constraints
//! attached by the source that produced each node and a set of derived
//! flags appended as the search learns about the path. A path of length N
//! is always a strict prefix-extension of a length N-1 path already in the
//! graph store; the leaf never changes identity across extensions of the
//! same branch.
//!
//! Paths are owned exclusively by the graph store. After construction the
//! only mutation is appending derived state: anchoring, cycle marks, the
//! source resumption cursor, revocation results, EV status and the score.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::certificate::{Certificate, CertificateId};
use crate::certificate_source::{AnchorRole, UsageConstraint, anchor_trust_permitted};
use crate::revocation::{RevocationReason, RevocationStatus};

// ---------------------------------------------------------------------------
// PathKey
// ---------------------------------------------------------------------------

/// Structural identity of a path: hash over its certificate-id sequence.
/// Two paths with the same certificate sequence are the same path.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathKey([u8; 32]);

impl PathKey {
    fn compute(certs: &[Arc<Certificate>]) -> Self {
        let mut hasher = Sha256::new();
        for cert in certs {
            hasher.update(cert.id().as_bytes());
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex: String = self.0[..8].iter().map(|b| format!("{b:02x}")).collect();
        write!(f, "PathKey({hex})")
    }
}

// ---------------------------------------------------------------------------
// CertificatePath
// ---------------------------------------------------------------------------

/// One candidate chain and its accumulated search state.
#[derive(Debug, Clone)]
pub struct CertificatePath {
    certs: Vec<Arc<Certificate>>,
    constraints: Vec<Option<Vec<UsageConstraint>>>,
    key: PathKey,
    is_anchored: bool,
    anchor_role: Option<AnchorRole>,
    is_self_signed: bool,
    has_cycle: bool,
    is_optionally_ev: bool,
    uses_weak_hash: bool,
    is_ev: bool,
    is_ct: bool,
    next_source: usize,
    score: Option<i64>,
    revocation: Vec<Option<RevocationStatus>>,
    revocation_done: bool,
}

impl CertificatePath {
    /// One-node path holding only the leaf.
    pub fn new_leaf(leaf: Arc<Certificate>) -> Self {
        let certs = vec![leaf];
        let key = PathKey::compute(&certs);
        let uses_weak_hash = compute_weak_hash(&certs);
        let is_optionally_ev = compute_optionally_ev(&certs);
        Self {
            constraints: vec![None],
            revocation: vec![None],
            key,
            is_anchored: false,
            anchor_role: None,
            is_self_signed: false,
            has_cycle: false,
            is_optionally_ev,
            uses_weak_hash,
            is_ev: false,
            is_ct: false,
            next_source: 0,
            score: None,
            revocation_done: false,
            certs,
        }
    }

    /// Strict prefix-extension of this path by one parent certificate,
    /// carrying the constraints the producing source attached. Anchoring is
    /// claimed only when the source is an anchor store and the constraint
    /// list permits it.
    pub fn extending(
        &self,
        parent: Arc<Certificate>,
        constraints: Option<Vec<UsageConstraint>>,
        anchor_role: Option<AnchorRole>,
    ) -> Self {
        let mut certs = self.certs.clone();
        certs.push(parent);
        let key = PathKey::compute(&certs);
        let uses_weak_hash = compute_weak_hash(&certs);
        let is_optionally_ev = compute_optionally_ev(&certs);
        let anchored = anchor_role.is_some()
            && anchor_trust_permitted(constraints.as_deref().unwrap_or(&[]));

        let mut node_constraints = self.constraints.clone();
        node_constraints.push(constraints);
        let mut revocation = vec![None; certs.len()];
        // Completed per-node results survive extension; the new tail starts
        // blank.
        revocation[..self.revocation.len()].clone_from_slice(&self.revocation);

        Self {
            constraints: node_constraints,
            revocation,
            key,
            is_anchored: anchored,
            anchor_role: if anchored { anchor_role } else { None },
            is_self_signed: false,
            has_cycle: self.has_cycle,
            is_optionally_ev,
            uses_weak_hash,
            is_ev: false,
            is_ct: self.is_ct,
            next_source: 0,
            score: None,
            revocation_done: false,
            certs,
        }
    }

    // -- structure ---------------------------------------------------------

    pub fn key(&self) -> PathKey {
        self.key
    }

    /// Number of certificates; always at least 1, the leaf.
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn leaf(&self) -> &Arc<Certificate> {
        &self.certs[0]
    }

    pub fn tail(&self) -> &Arc<Certificate> {
        self.certs.last().expect("path holds at least the leaf")
    }

    pub fn certs(&self) -> &[Arc<Certificate>] {
        &self.certs
    }

    pub fn cert_at(&self, ix: usize) -> &Arc<Certificate> {
        &self.certs[ix]
    }

    pub fn constraints_at(&self, ix: usize) -> Option<&[UsageConstraint]> {
        self.constraints[ix].as_deref()
    }

    pub fn contains_certificate(&self, id: CertificateId) -> bool {
        self.certs.iter().any(|cert| cert.id() == id)
    }

    // -- derived flags -----------------------------------------------------

    pub fn is_anchored(&self) -> bool {
        self.is_anchored
    }

    pub fn anchor_role(&self) -> Option<AnchorRole> {
        self.anchor_role
    }

    /// Anchor the path at its current tail (used when the leaf itself, or a
    /// reconsidered tail, resolves to a trusted anchor).
    pub fn mark_anchored(&mut self, role: AnchorRole, constraints: Option<Vec<UsageConstraint>>) {
        self.is_anchored = true;
        self.anchor_role = Some(role);
        if let Some(last) = self.constraints.last_mut() {
            *last = constraints;
        }
    }

    pub fn is_self_signed(&self) -> bool {
        self.is_self_signed
    }

    pub fn mark_self_signed(&mut self) {
        self.is_self_signed = true;
    }

    pub fn has_cycle(&self) -> bool {
        self.has_cycle
    }

    /// Parent discovery looped back onto an ancestor of this path.
    pub fn note_cycle(&mut self) {
        self.has_cycle = true;
    }

    /// Every certificate carries the leaf's EV policy; the path can become
    /// EV if revocation checking succeeds.
    pub fn is_optionally_ev(&self) -> bool {
        self.is_optionally_ev
    }

    pub fn is_ev(&self) -> bool {
        self.is_ev
    }

    pub fn set_ev(&mut self, is_ev: bool) {
        self.is_ev = is_ev;
    }

    pub fn is_ct(&self) -> bool {
        self.is_ct
    }

    pub fn set_ct(&mut self, is_ct: bool) {
        self.is_ct = is_ct;
    }

    pub fn uses_weak_hash(&self) -> bool {
        self.uses_weak_hash
    }

    // -- search cursor -----------------------------------------------------

    /// Index of the next source to consult when extending this path.
    pub fn next_source(&self) -> usize {
        self.next_source
    }

    pub fn advance_source(&mut self) {
        self.next_source += 1;
    }

    // -- score -------------------------------------------------------------

    pub fn score(&self) -> Option<i64> {
        self.score
    }

    pub fn set_score(&mut self, score: i64) {
        self.score = Some(score);
    }

    // -- revocation --------------------------------------------------------

    pub fn revocation_done(&self) -> bool {
        self.revocation_done
    }

    pub fn set_revocation_done(&mut self) {
        self.revocation_done = true;
    }

    pub fn record_revocation(&mut self, ix: usize, status: RevocationStatus) {
        self.revocation[ix] = Some(status);
    }

    pub fn revocation_at(&self, ix: usize) -> Option<RevocationStatus> {
        self.revocation.get(ix).copied().flatten()
    }

    /// First revoked link's reason, if any link came back revoked.
    pub fn revocation_reason(&self) -> Option<RevocationReason> {
        self.revocation.iter().flatten().find_map(|s| match s {
            RevocationStatus::Revoked { reason } => Some(*reason),
            _ => None,
        })
    }

    /// All checked links answered `Good`. Links without an issuer (the
    /// root-most node) are exempt.
    pub fn revocation_all_good(&self) -> bool {
        if self.certs.len() < 2 {
            return false;
        }
        self.revocation[..self.certs.len() - 1]
            .iter()
            .all(|s| matches!(s, Some(status) if status.is_good()))
    }

    /// Intersection of the `Good` answers' freshness windows.
    pub fn revocation_valid_until(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.revocation
            .iter()
            .flatten()
            .filter_map(|s| match s {
                RevocationStatus::Good { valid_until } => Some(*valid_until),
                _ => None,
            })
            .min()
    }
}

fn compute_weak_hash(certs: &[Arc<Certificate>]) -> bool {
    // The root-most certificate of a multi-node chain signs nothing in the
    // chain; its own signature algorithm is exempt when self-issued.
    let checked = if certs.len() > 1 && certs.last().is_some_and(|t| t.is_self_issued()) {
        &certs[..certs.len() - 1]
    } else {
        certs
    };
    checked
        .iter()
        .any(|cert| cert.signature_algorithm.is_weak())
}

fn compute_optionally_ev(certs: &[Arc<Certificate>]) -> bool {
    let Some(leaf_policy) = certs[0].ev_policy.as_ref() else {
        return false;
    };
    certs
        .iter()
        .all(|cert| cert.ev_policy.as_ref() == Some(leaf_policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{DistinguishedName, KeyId, PolicyOid, SignatureAlgorithm};
    use chrono::{TimeZone, Utc};

    fn make_cert_with(
        subject: &str,
        issuer: &str,
        algorithm: SignatureAlgorithm,
        ev: Option<&str>,
    ) -> Arc<Certificate> {
        Arc::new(Certificate::new(
            DistinguishedName::new(subject),
            DistinguishedName::new(issuer),
            KeyId::from_bytes(subject.as_bytes().to_vec()),
            Some(KeyId::from_bytes(issuer.as_bytes().to_vec())),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            algorithm,
            true,
            ev.map(|oid| PolicyOid(oid.to_string())),
            format!("{subject}|{issuer}|{algorithm}").into_bytes(),
        ))
    }

    fn make_cert(subject: &str, issuer: &str) -> Arc<Certificate> {
        make_cert_with(subject, issuer, SignatureAlgorithm::EcdsaSha256, None)
    }

    #[test]
    fn extension_preserves_leaf_and_appends_tail() {
        let leaf = make_cert("CN=leaf", "CN=ca");
        let ca = make_cert("CN=ca", "CN=root");
        let path = CertificatePath::new_leaf(leaf.clone());
        let extended = path.extending(ca.clone(), None, None);

        assert_eq!(extended.len(), 2);
        assert_eq!(extended.leaf().id(), leaf.id());
        assert_eq!(extended.tail().id(), ca.id());
        assert_ne!(path.key(), extended.key());
    }

    #[test]
    fn structural_key_depends_only_on_sequence() {
        let leaf = make_cert("CN=leaf", "CN=ca");
        let ca = make_cert("CN=ca", "CN=ca");
        let a = CertificatePath::new_leaf(leaf.clone()).extending(ca.clone(), None, None);
        let b = CertificatePath::new_leaf(leaf).extending(
            ca,
            Some(vec![UsageConstraint::trust_root()]),
            Some(AnchorRole::System),
        );
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn anchoring_requires_permitting_constraints() {
        let leaf = make_cert("CN=leaf", "CN=root");
        let root = make_cert("CN=root", "CN=root");
        let base = CertificatePath::new_leaf(leaf);

        let anchored = base.extending(root.clone(), None, Some(AnchorRole::System));
        assert!(anchored.is_anchored());

        let denied = base.extending(
            root.clone(),
            Some(vec![UsageConstraint::deny()]),
            Some(AnchorRole::System),
        );
        assert!(!denied.is_anchored());

        let plain = base.extending(root, None, None);
        assert!(!plain.is_anchored());
    }

    #[test]
    fn weak_hash_exempts_self_issued_root() {
        let leaf = make_cert("CN=leaf", "CN=root");
        let weak_root =
            make_cert_with("CN=root", "CN=root", SignatureAlgorithm::Sha1Rsa, None);
        let path = CertificatePath::new_leaf(leaf).extending(weak_root, None, None);
        assert!(!path.uses_weak_hash());

        let weak_leaf = make_cert_with("CN=leaf2", "CN=root", SignatureAlgorithm::Sha1Rsa, None);
        let root = make_cert("CN=root", "CN=root");
        let weak_path = CertificatePath::new_leaf(weak_leaf).extending(root, None, None);
        assert!(weak_path.uses_weak_hash());
    }

    #[test]
    fn optionally_ev_requires_uniform_policy() {
        let oid = "2.23.140.1.1";
        let leaf = make_cert_with("CN=leaf", "CN=ca", SignatureAlgorithm::EcdsaSha256, Some(oid));
        let ca = make_cert_with("CN=ca", "CN=ca", SignatureAlgorithm::EcdsaSha256, Some(oid));
        let path = CertificatePath::new_leaf(leaf.clone()).extending(ca, None, None);
        assert!(path.is_optionally_ev());

        let plain_ca = make_cert("CN=ca", "CN=ca");
        let broken = CertificatePath::new_leaf(leaf).extending(plain_ca, None, None);
        assert!(!broken.is_optionally_ev());
    }

    #[test]
    fn revocation_results_survive_extension() {
        let leaf = make_cert("CN=leaf", "CN=ca");
        let ca = make_cert("CN=ca", "CN=root");
        let root = make_cert("CN=root", "CN=root");

        let mut path = CertificatePath::new_leaf(leaf).extending(ca, None, None);
        let good = RevocationStatus::Good {
            valid_until: Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap(),
        };
        path.record_revocation(0, good);

        let extended = path.extending(root, None, None);
        assert_eq!(extended.revocation_at(0), Some(good));
        assert_eq!(extended.revocation_at(1), None);
        assert!(!extended.revocation_all_good());
    }

    #[test]
    fn revocation_aggregates() {
        let leaf = make_cert("CN=leaf", "CN=ca");
        let ca = make_cert("CN=ca", "CN=root");
        let root = make_cert("CN=root", "CN=root");
        let mut path = CertificatePath::new_leaf(leaf)
            .extending(ca, None, None)
            .extending(root, None, None);

        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2028, 1, 1, 0, 0, 0).unwrap();
        path.record_revocation(0, RevocationStatus::Good { valid_until: late });
        path.record_revocation(1, RevocationStatus::Good { valid_until: early });

        assert!(path.revocation_all_good());
        assert_eq!(path.revocation_valid_until(), Some(early));
        assert_eq!(path.revocation_reason(), None);

        path.record_revocation(
            1,
            RevocationStatus::Revoked {
                reason: RevocationReason::CaCompromise,
            },
        );
        assert!(!path.revocation_all_good());
        assert_eq!(
            path.revocation_reason(),
            Some(RevocationReason::CaCompromise)
        );
    }
}
