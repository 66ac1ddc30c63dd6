//! Policy evaluation contexts.
//!
//! A [`PolicyVerificationContext`] (PVC) drives one [`Policy`] over the
//! paths the builder discovers and records that policy's verdicts. The
//! builder owns one PVC per policy and OR-combines acceptance: one
//! accepting PVC accepts the path.
//!
//! The concrete predicates (hostname match, key usage, EV programs, CT)
//! live behind the [`Policy`] trait; this module supplies the baseline
//! X.509 policy, the static parent checks every policy shares, the
//! user-exception filter and the pinning seam.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::certificate_path::CertificatePath;
use crate::certificate_source::{TrustDisposition, UsageConstraint};

// ---------------------------------------------------------------------------
// Check identifiers and failures
// ---------------------------------------------------------------------------

/// Identifier of one policy check, used as the key of per-certificate
/// diagnostic dictionaries and of user exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CheckName {
    ValidityWindow,
    IssuerLinkage,
    IssuerKeyUsage,
    BasicConstraints,
    AnchorTrusted,
    UsageConstraints,
    WeakHash,
    Revocation,
    ExtendedValidation,
    CtRequired,
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidityWindow => write!(f, "validity_window"),
            Self::IssuerLinkage => write!(f, "issuer_linkage"),
            Self::IssuerKeyUsage => write!(f, "issuer_key_usage"),
            Self::BasicConstraints => write!(f, "basic_constraints"),
            Self::AnchorTrusted => write!(f, "anchor_trusted"),
            Self::UsageConstraints => write!(f, "usage_constraints"),
            Self::WeakHash => write!(f, "weak_hash"),
            Self::Revocation => write!(f, "revocation"),
            Self::ExtendedValidation => write!(f, "extended_validation"),
            Self::CtRequired => write!(f, "ct_required"),
        }
    }
}

/// One failed check against one certificate of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub cert_index: usize,
    pub check: CheckName,
    pub message: String,
}

impl CheckFailure {
    pub fn new(cert_index: usize, check: CheckName, message: impl Into<String>) -> Self {
        Self {
            cert_index,
            check,
            message: message.into(),
        }
    }
}

/// Per-certificate diagnostic dictionary assembled during ComputeDetails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDiagnostics {
    pub failures: BTreeMap<CheckName, String>,
}

impl CertificateDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// One policy's verdict over one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathVerdict {
    pub failures: Vec<CheckFailure>,
    /// The policy's EV opinion, before revocation gating.
    pub ev_ok: bool,
}

impl PathVerdict {
    pub fn clean(ev_ok: bool) -> Self {
        Self {
            failures: Vec::new(),
            ev_ok,
        }
    }

    pub fn accepted(&self) -> bool {
        self.failures.is_empty()
    }

    /// Acceptance after filtering failures the user has excepted.
    pub fn accepted_with_exceptions(&self, exceptions: &TrustExceptions) -> bool {
        self.failures
            .iter()
            .all(|f| exceptions.allows(f.cert_index, f.check))
    }
}

/// User-provided exceptions: per-certificate sets of check failures the
/// caller has chosen to accept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustExceptions {
    pub per_cert: Vec<BTreeSet<CheckName>>,
}

impl TrustExceptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn allows(&self, cert_index: usize, check: CheckName) -> bool {
        self.per_cert
            .get(cert_index)
            .is_some_and(|set| set.contains(&check))
    }

    pub fn is_empty(&self) -> bool {
        self.per_cert.iter().all(BTreeSet::is_empty)
    }
}

// ---------------------------------------------------------------------------
// Policy trait
// ---------------------------------------------------------------------------

/// Context handed to path checks.
#[derive(Debug, Clone, Copy)]
pub struct PathCheckContext {
    pub verify_time: DateTime<Utc>,
}

/// One independent policy evaluator.
pub trait Policy {
    fn name(&self) -> &str;

    /// Leaf-only checks, run once before the search starts.
    fn check_leaf(&self, _leaf: &Certificate, _verify_time: DateTime<Utc>) -> Vec<CheckFailure> {
        Vec::new()
    }

    /// Static per-parent checks run at path-construction time: issuer
    /// linkage, issuer authority to sign certificates, validity-window
    /// sanity. Cheap, no signature math.
    fn parent_checks(
        &self,
        child: &Certificate,
        parent: &Certificate,
        verify_time: DateTime<Utc>,
    ) -> bool {
        child.issued_by(parent) && parent.is_ca && parent.valid_at(verify_time)
    }

    /// Full per-path checks, run when a candidate is validated.
    fn path_checks(&self, path: &CertificatePath, ctx: &PathCheckContext) -> PathVerdict;
}

pub type SharedPolicy = Arc<dyn Policy + Send + Sync>;

/// Pinning seam: construction-time augmentation of the policy set from the
/// leaf certificate (the original's pinning database lookup).
pub trait PinningProvider {
    fn policies_for_leaf(&self, leaf: &Certificate) -> Vec<SharedPolicy>;
}

// ---------------------------------------------------------------------------
// BasicX509Policy
// ---------------------------------------------------------------------------

/// Baseline chain policy: anchored termination, validity windows containing
/// the verification time, CA authority on issuing nodes, and no denying
/// usage constraint on any node.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicX509Policy;

impl Policy for BasicX509Policy {
    fn name(&self) -> &str {
        "basic_x509"
    }

    fn check_leaf(&self, leaf: &Certificate, verify_time: DateTime<Utc>) -> Vec<CheckFailure> {
        if leaf.valid_at(verify_time) {
            Vec::new()
        } else {
            vec![CheckFailure::new(
                0,
                CheckName::ValidityWindow,
                "leaf outside validity window",
            )]
        }
    }

    fn path_checks(&self, path: &CertificatePath, ctx: &PathCheckContext) -> PathVerdict {
        let mut failures = Vec::new();

        if !path.is_anchored() {
            failures.push(CheckFailure::new(
                path.len() - 1,
                CheckName::AnchorTrusted,
                "chain does not terminate at a trusted anchor",
            ));
        }

        for (ix, cert) in path.certs().iter().enumerate() {
            if !cert.valid_at(ctx.verify_time) {
                failures.push(CheckFailure::new(
                    ix,
                    CheckName::ValidityWindow,
                    format!("not valid at {}", ctx.verify_time),
                ));
            }
            if ix > 0 && !cert.is_ca {
                failures.push(CheckFailure::new(
                    ix,
                    CheckName::BasicConstraints,
                    "issuing certificate is not a CA",
                ));
            }
            if let Some(constraints) = path.constraints_at(ix) {
                if denies_usage(constraints) {
                    failures.push(CheckFailure::new(
                        ix,
                        CheckName::UsageConstraints,
                        "usage constraints deny this certificate",
                    ));
                }
            }
        }

        PathVerdict {
            ev_ok: path.is_optionally_ev(),
            failures,
        }
    }
}

fn denies_usage(constraints: &[UsageConstraint]) -> bool {
    constraints
        .iter()
        .any(|c| c.trust == TrustDisposition::Deny)
}

// ---------------------------------------------------------------------------
// Certificate Transparency material
// ---------------------------------------------------------------------------

/// Stapled signed certificate timestamp. Only the log identity is consulted
/// here; cryptographic SCT verification is a collaborator concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCertificateTimestamp {
    pub log_id: Vec<u8>,
    pub timestamp_ms: u64,
}

/// Trusted CT log set, keyed by log id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtLogSet {
    pub log_ids: BTreeSet<Vec<u8>>,
}

impl CtLogSet {
    pub fn from_log_ids(ids: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            log_ids: ids.into_iter().collect(),
        }
    }

    /// At least one stapled SCT comes from a trusted log.
    pub fn satisfied_by(&self, scts: &[SignedCertificateTimestamp]) -> bool {
        !self.log_ids.is_empty() && scts.iter().any(|sct| self.log_ids.contains(&sct.log_id))
    }
}

// ---------------------------------------------------------------------------
// PolicyVerificationContext
// ---------------------------------------------------------------------------

/// One policy plus its recorded verdicts for the path currently under
/// validation. Owned and reset by the builder; collaborators never mutate
/// a PVC directly.
pub struct PolicyVerificationContext {
    policy: SharedPolicy,
    leaf_failures: Vec<CheckFailure>,
    verdict: Option<PathVerdict>,
}

impl PolicyVerificationContext {
    pub fn new(policy: SharedPolicy) -> Self {
        Self {
            policy,
            leaf_failures: Vec::new(),
            verdict: None,
        }
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub fn run_leaf_checks(&mut self, leaf: &Certificate, verify_time: DateTime<Utc>) {
        self.leaf_failures = self.policy.check_leaf(leaf, verify_time);
    }

    pub fn leaf_rejected(&self) -> bool {
        !self.leaf_failures.is_empty()
    }

    pub fn leaf_failures(&self) -> &[CheckFailure] {
        &self.leaf_failures
    }

    pub fn parent_checks(
        &self,
        child: &Certificate,
        parent: &Certificate,
        verify_time: DateTime<Utc>,
    ) -> bool {
        self.policy.parent_checks(child, parent, verify_time)
    }

    pub fn reset_for_path(&mut self) {
        self.verdict = None;
    }

    pub fn run_path_checks(&mut self, path: &CertificatePath, ctx: &PathCheckContext) {
        self.verdict = Some(self.policy.path_checks(path, ctx));
    }

    pub fn verdict(&self) -> Option<&PathVerdict> {
        self.verdict.as_ref()
    }

    pub fn accepted(&self, exceptions: &TrustExceptions) -> bool {
        self.verdict
            .as_ref()
            .is_some_and(|v| v.accepted_with_exceptions(exceptions))
    }
}

impl fmt::Debug for PolicyVerificationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyVerificationContext")
            .field("policy", &self.policy.name())
            .field("leaf_failures", &self.leaf_failures)
            .field("verdict", &self.verdict)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{DistinguishedName, KeyId, SignatureAlgorithm};
    use crate::certificate_source::AnchorRole;
    use chrono::TimeZone;

    fn make_cert(subject: &str, issuer: &str, is_ca: bool) -> Arc<Certificate> {
        Arc::new(Certificate::new(
            DistinguishedName::new(subject),
            DistinguishedName::new(issuer),
            KeyId::from_bytes(subject.as_bytes().to_vec()),
            Some(KeyId::from_bytes(issuer.as_bytes().to_vec())),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            SignatureAlgorithm::EcdsaSha256,
            is_ca,
            None,
            format!("{subject}|{issuer}|{is_ca}").into_bytes(),
        ))
    }

    fn verify_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn anchored_path() -> CertificatePath {
        let leaf = make_cert("CN=leaf", "CN=root", false);
        let root = make_cert("CN=root", "CN=root", true);
        CertificatePath::new_leaf(leaf).extending(root, None, Some(AnchorRole::System))
    }

    #[test]
    fn basic_policy_accepts_anchored_valid_chain() {
        let verdict = BasicX509Policy.path_checks(
            &anchored_path(),
            &PathCheckContext {
                verify_time: verify_time(),
            },
        );
        assert!(verdict.accepted());
    }

    #[test]
    fn basic_policy_rejects_unanchored_chain() {
        let leaf = make_cert("CN=leaf", "CN=ca", false);
        let ca = make_cert("CN=ca", "CN=missing", true);
        let path = CertificatePath::new_leaf(leaf).extending(ca, None, None);

        let verdict = BasicX509Policy.path_checks(
            &path,
            &PathCheckContext {
                verify_time: verify_time(),
            },
        );
        assert!(!verdict.accepted());
        assert!(
            verdict
                .failures
                .iter()
                .any(|f| f.check == CheckName::AnchorTrusted)
        );
    }

    #[test]
    fn basic_policy_flags_non_ca_issuer() {
        let leaf = make_cert("CN=leaf", "CN=mid", false);
        let mid = make_cert("CN=mid", "CN=mid", false);
        let path = CertificatePath::new_leaf(leaf).extending(mid, None, Some(AnchorRole::System));

        let verdict = BasicX509Policy.path_checks(
            &path,
            &PathCheckContext {
                verify_time: verify_time(),
            },
        );
        assert!(
            verdict
                .failures
                .iter()
                .any(|f| f.check == CheckName::BasicConstraints && f.cert_index == 1)
        );
    }

    #[test]
    fn exceptions_filter_failures() {
        let verdict = PathVerdict {
            failures: vec![CheckFailure::new(
                0,
                CheckName::ValidityWindow,
                "expired",
            )],
            ev_ok: false,
        };
        assert!(!verdict.accepted());
        assert!(!verdict.accepted_with_exceptions(&TrustExceptions::none()));

        let exceptions = TrustExceptions {
            per_cert: vec![BTreeSet::from([CheckName::ValidityWindow])],
        };
        assert!(verdict.accepted_with_exceptions(&exceptions));
    }

    #[test]
    fn ct_log_set_matches_by_log_id() {
        let logs = CtLogSet::from_log_ids([b"log-a".to_vec()]);
        let sct_ok = SignedCertificateTimestamp {
            log_id: b"log-a".to_vec(),
            timestamp_ms: 1,
        };
        let sct_bad = SignedCertificateTimestamp {
            log_id: b"log-b".to_vec(),
            timestamp_ms: 2,
        };
        assert!(logs.satisfied_by(&[sct_bad.clone(), sct_ok]));
        assert!(!logs.satisfied_by(&[sct_bad]));
        assert!(!CtLogSet::default().satisfied_by(&[]));
    }

    #[test]
    fn pvc_records_leaf_and_path_verdicts() {
        let mut pvc = PolicyVerificationContext::new(Arc::new(BasicX509Policy));
        let path = anchored_path();
        pvc.run_leaf_checks(path.leaf(), verify_time());
        assert!(!pvc.leaf_rejected());

        pvc.run_path_checks(
            &path,
            &PathCheckContext {
                verify_time: verify_time(),
            },
        );
        assert!(pvc.accepted(&TrustExceptions::none()));
    }
}
