//! Evaluation outcome types.
//!
//! The completion payload mirrors what the builder learned about the best
//! path: the chain itself, per-certificate diagnostics, the info record
//! (EV / CT / revocation facts) and the overall trust-result class.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::certificate::Certificate;
use crate::policy_context::CertificateDiagnostics;
use crate::revocation::RevocationReason;

// ---------------------------------------------------------------------------
// TrustBuildError
// ---------------------------------------------------------------------------

/// Structural input errors, raised before any search state exists. All
/// other negative outcomes flow through the reject/score mechanism and
/// complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustBuildError {
    /// The leaf-first certificate array was empty.
    #[error("invalid certificates: input chain is empty")]
    InvalidCertificates,
    /// A resume call referenced a ticket that is not outstanding.
    #[error("stale resume ticket {ticket}")]
    StaleTicket { ticket: u64 },
    /// A resume call arrived after the completion callback already fired.
    #[error("builder already completed")]
    AlreadyCompleted,
    /// The blocking wrapper needs synchronous collaborators; a source or
    /// revocation job deferred and nobody can resume it.
    #[error("evaluation suspended on a deferred collaborator ({waiting_on})")]
    CollaboratorPending { waiting_on: String },
}

// ---------------------------------------------------------------------------
// TrustResult
// ---------------------------------------------------------------------------

/// Overall outcome class for the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrustResult {
    /// Accepted, and acceptance rests on an explicit user-trust decision.
    Proceed,
    /// Accepted under the evaluated policies.
    Unspecified,
    /// Rejected, but a different policy configuration or user exception
    /// could make it acceptable.
    RecoverableTrustFailure,
    /// Rejected with no recovery path (a certificate was revoked).
    FatalTrustFailure,
    /// Structurally invalid input.
    Invalid,
}

impl TrustResult {
    pub fn is_trusted(self) -> bool {
        matches!(self, Self::Proceed | Self::Unspecified)
    }
}

impl fmt::Display for TrustResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proceed => write!(f, "proceed"),
            Self::Unspecified => write!(f, "unspecified"),
            Self::RecoverableTrustFailure => write!(f, "recoverable_trust_failure"),
            Self::FatalTrustFailure => write!(f, "fatal_trust_failure"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

// ---------------------------------------------------------------------------
// EvaluationInfo
// ---------------------------------------------------------------------------

/// Info record accompanying the result (the original's info dictionary).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationInfo {
    /// Best path qualified for Extended Validation.
    pub extended_validation: bool,
    /// Best path satisfied the Certificate Transparency requirement.
    pub certificate_transparency: bool,
    /// Every checked link produced a definitive revocation answer.
    pub revocation_checked: bool,
    /// Freshness horizon of the revocation answers, when all were good.
    pub revocation_valid_until: Option<DateTime<Utc>>,
    /// Reason code of the first revoked link, if any.
    pub revocation_reason: Option<RevocationReason>,
}

// ---------------------------------------------------------------------------
// TrustEvaluation
// ---------------------------------------------------------------------------

/// Final completion payload. Produced exactly once per build.
#[derive(Debug, Clone)]
pub struct TrustEvaluation {
    /// Ordered chain mirroring the best path, leaf first.
    pub chain: Vec<Arc<Certificate>>,
    /// One diagnostics record per chain certificate.
    pub details: Vec<CertificateDiagnostics>,
    pub info: EvaluationInfo,
    pub result: TrustResult,
    /// Final score of the best path.
    pub score: i64,
}

impl TrustEvaluation {
    pub fn is_trusted(&self) -> bool {
        self.result.is_trusted()
    }
}
