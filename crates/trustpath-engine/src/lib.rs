#![forbid(unsafe_code)]

//! Certification-path building and trust evaluation.
//!
//! Given a leaf certificate, a set of parent sources and a set of trust
//! policies, the engine discovers candidate chains incrementally, scores
//! every validated chain and reports the best explanation it found, whether
//! or not that explanation is trusted. The search is bounded, deterministic
//! for identical inputs, and suspends cooperatively on deferred
//! collaborators (network parent fetches, revocation lookups) instead of
//! blocking.

pub mod certificate;
pub mod certificate_path;
pub mod certificate_source;
pub mod path_builder;
pub mod path_graph;
pub mod path_score;
pub mod policy_context;
pub mod revocation;
pub mod trust_result;

pub use certificate::{Certificate, CertificateId, SharedVerifier, SignatureVerifier};
pub use certificate_path::CertificatePath;
pub use certificate_source::{
    AnchorRole, AnchorSource, CertificateSource, FetchTicket, ParentFetch, UsageConstraint,
};
pub use path_builder::{BuildParameters, Collaborators, PathBuilder, evaluate_trust};
pub use path_graph::{MAX_CHAIN_LENGTH, MAX_NUM_CHAINS};
pub use policy_context::{Policy, SharedPolicy, TrustExceptions};
pub use revocation::{RevocationChecker, RevocationStatus, RevocationTicket};
pub use trust_result::{TrustBuildError, TrustEvaluation, TrustResult};
