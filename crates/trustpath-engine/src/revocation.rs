//! Revocation-status seam.
//!
//! Revocation is an out-of-core, possibly asynchronous determination. The
//! builder issues one job per non-root link of a path; each job completes
//! either immediately ([`RevocationCheck::Ready`]) or later through
//! `PathBuilder::provide_revocation` with the issued ticket. All jobs for a
//! path must complete before the path's verdict is aggregated.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;

// ---------------------------------------------------------------------------
// Status model
// ---------------------------------------------------------------------------

/// CRL reason codes (RFC 5280 §5.3.1 subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
}

impl RevocationReason {
    /// Numeric wire code for the reason.
    pub fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::KeyCompromise => write!(f, "key_compromise"),
            Self::CaCompromise => write!(f, "ca_compromise"),
            Self::AffiliationChanged => write!(f, "affiliation_changed"),
            Self::Superseded => write!(f, "superseded"),
            Self::CessationOfOperation => write!(f, "cessation_of_operation"),
            Self::CertificateHold => write!(f, "certificate_hold"),
        }
    }
}

/// Result of one revocation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationStatus {
    /// Definitively not revoked; the answer is fresh until `valid_until`.
    Good { valid_until: DateTime<Utc> },
    /// Definitively revoked.
    Revoked { reason: RevocationReason },
    /// No definitive answer was obtainable.
    Unknown,
}

impl RevocationStatus {
    pub fn is_good(&self) -> bool {
        matches!(self, Self::Good { .. })
    }

    pub fn is_revoked(&self) -> bool {
        matches!(self, Self::Revoked { .. })
    }
}

// ---------------------------------------------------------------------------
// Checker interface
// ---------------------------------------------------------------------------

/// Ticket identifying one outstanding deferred revocation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevocationTicket(pub u64);

/// Stapled OCSP response material handed through to the checker. The
/// engine never interprets the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StapledOcspResponse {
    pub der: Vec<u8>,
}

/// Outcome of starting one revocation job.
#[derive(Debug, Clone, Copy)]
pub enum RevocationCheck {
    Ready(RevocationStatus),
    Pending(RevocationTicket),
}

/// Collaborator performing the actual revocation lookup (database, OCSP,
/// CRL). A deferred job must eventually be answered exactly once through
/// the builder's resume entry point; timeouts are the collaborator's
/// responsibility.
pub trait RevocationChecker {
    fn check(
        &mut self,
        cert: &Arc<Certificate>,
        issuer: Option<&Arc<Certificate>>,
        stapled: Option<&StapledOcspResponse>,
        ticket: RevocationTicket,
    ) -> RevocationCheck;
}

/// Default checker: every job completes immediately with `Unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRevocationChecker;

impl RevocationChecker for NullRevocationChecker {
    fn check(
        &mut self,
        _cert: &Arc<Certificate>,
        _issuer: Option<&Arc<Certificate>>,
        _stapled: Option<&StapledOcspResponse>,
        _ticket: RevocationTicket,
    ) -> RevocationCheck {
        RevocationCheck::Ready(RevocationStatus::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{DistinguishedName, KeyId, SignatureAlgorithm};
    use chrono::TimeZone;

    #[test]
    fn reason_codes_follow_crl_numbering() {
        assert_eq!(RevocationReason::Unspecified.code(), 0);
        assert_eq!(RevocationReason::KeyCompromise.code(), 1);
        assert_eq!(RevocationReason::CertificateHold.code(), 6);
    }

    #[test]
    fn status_predicates() {
        let good = RevocationStatus::Good {
            valid_until: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        };
        assert!(good.is_good() && !good.is_revoked());

        let revoked = RevocationStatus::Revoked {
            reason: RevocationReason::KeyCompromise,
        };
        assert!(revoked.is_revoked() && !revoked.is_good());
        assert!(!RevocationStatus::Unknown.is_good());
    }

    #[test]
    fn null_checker_answers_unknown_immediately() {
        let cert = Arc::new(Certificate::new(
            DistinguishedName::new("CN=leaf"),
            DistinguishedName::new("CN=ca"),
            KeyId::from_bytes(b"leaf".to_vec()),
            None,
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            SignatureAlgorithm::EcdsaSha256,
            false,
            None,
            b"leaf-der".to_vec(),
        ));
        match NullRevocationChecker.check(&cert, None, None, RevocationTicket(1)) {
            RevocationCheck::Ready(RevocationStatus::Unknown) => {}
            other => panic!("expected immediate unknown, got {other:?}"),
        }
    }
}
