//! Certificate model consumed by the path engine.
//!
//! The engine never parses ASN.1. A [`Certificate`] is an already-decoded
//! record carrying exactly the fields path construction and the static
//! parent checks consult:
//! - subject / issuer names and key identifiers (issuer linkage)
//! - validity window (sanity checks against the verification time)
//! - signature algorithm class (weak-hash scoring)
//! - basic-constraints summary (`is_ca`)
//! - certificate-policies summary (`ev_policy`, EV candidacy)
//!
//! Signature verification itself is a collaborator concern behind the
//! [`SignatureVerifier`] seam; the default [`KeyIdVerifier`] resolves
//! linkage deterministically from key identifiers and names.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// CertificateId
// ---------------------------------------------------------------------------

/// Content identity of a certificate: SHA-256 over its encoded bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CertificateId(pub [u8; 32]);

impl CertificateId {
    pub fn compute(der: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(der);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertificateId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Names and key identifiers
// ---------------------------------------------------------------------------

/// Rendered distinguished name. Comparison is by exact rendered form; name
/// normalization happens in the (external) parsing layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DistinguishedName(pub String);

impl DistinguishedName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subject / authority key identifier bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId(pub Vec<u8>);

impl KeyId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

// ---------------------------------------------------------------------------
// SignatureAlgorithm
// ---------------------------------------------------------------------------

/// Signature algorithm class, reduced to what scoring and the weak-hash
/// rules need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    Md5Rsa,
    Sha1Rsa,
    Sha256Rsa,
    Sha384Rsa,
    EcdsaSha256,
    EcdsaSha384,
}

impl SignatureAlgorithm {
    /// MD5 and SHA-1 digests are considered weak for chain scoring.
    pub fn is_weak(self) -> bool {
        matches!(self, Self::Md5Rsa | Self::Sha1Rsa)
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5Rsa => write!(f, "md5_rsa"),
            Self::Sha1Rsa => write!(f, "sha1_rsa"),
            Self::Sha256Rsa => write!(f, "sha256_rsa"),
            Self::Sha384Rsa => write!(f, "sha384_rsa"),
            Self::EcdsaSha256 => write!(f, "ecdsa_sha256"),
            Self::EcdsaSha384 => write!(f, "ecdsa_sha384"),
        }
    }
}

/// Object identifier of a certificate policy, dotted-decimal form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyOid(pub String);

impl fmt::Display for PolicyOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

/// An already-decoded certificate record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    pub subject_key_id: KeyId,
    pub authority_key_id: Option<KeyId>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub signature_algorithm: SignatureAlgorithm,
    pub is_ca: bool,
    pub ev_policy: Option<PolicyOid>,
    /// Opaque encoded bytes; identity is derived from these.
    pub der: Vec<u8>,
    id: CertificateId,
}

impl Certificate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subject: DistinguishedName,
        issuer: DistinguishedName,
        subject_key_id: KeyId,
        authority_key_id: Option<KeyId>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        signature_algorithm: SignatureAlgorithm,
        is_ca: bool,
        ev_policy: Option<PolicyOid>,
        der: Vec<u8>,
    ) -> Self {
        let id = CertificateId::compute(&der);
        Self {
            subject,
            issuer,
            subject_key_id,
            authority_key_id,
            not_before,
            not_after,
            signature_algorithm,
            is_ca,
            ev_policy,
            der,
            id,
        }
    }

    pub fn id(&self) -> CertificateId {
        self.id
    }

    /// Subject and issuer name coincide. Whether the self-signature actually
    /// verifies is a [`SignatureVerifier`] question.
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Validity window contains `at`.
    pub fn valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Name/key-id evidence that `issuer` could have issued `self`.
    pub fn issued_by(&self, issuer: &Certificate) -> bool {
        if self.issuer != issuer.subject {
            return false;
        }
        match &self.authority_key_id {
            Some(akid) => *akid == issuer.subject_key_id,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// SignatureVerifier seam
// ---------------------------------------------------------------------------

/// Narrow seam to the external cryptographic library. The engine asks one
/// question: does `issuer`'s key verify `cert`'s signature.
pub trait SignatureVerifier {
    fn signature_valid(&self, cert: &Certificate, issuer: &Certificate) -> bool;
}

/// Default verifier: linkage by authority/subject key identifier with a
/// name-match fallback. Deterministic stand-in for real signature checks
/// when the crypto collaborator is not wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyIdVerifier;

impl SignatureVerifier for KeyIdVerifier {
    fn signature_valid(&self, cert: &Certificate, issuer: &Certificate) -> bool {
        cert.issued_by(issuer)
    }
}

pub type SharedVerifier = Arc<dyn SignatureVerifier + Send + Sync>;
