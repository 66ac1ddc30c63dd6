//! Path scoring.
//!
//! The search must hand back a single deterministic "best explanation"
//! even when nothing is fully trusted, so every validated path gets a
//! comparable integer. The contract is the ordering, not the constants:
//! any accepted path outscores any rejected one, and among rejected paths
//! an EV-qualified path outscores any non-EV path regardless of the base
//! component. The base component stays below `BASE_SCORE_LIMIT` so the
//! bonuses dominate by construction.

use crate::certificate_path::CertificatePath;
use crate::path_graph::MAX_CHAIN_LENGTH;

/// Added once per accepted path. Dominates every other component.
pub const ACCEPT_PATH_SCORE: i64 = 10_000_000;

/// Added for an EV-qualified path. Dominates the base component.
pub const EV_SCORE_BONUS: i64 = 1_000_000;

/// The base component's magnitude stays strictly below this.
pub const BASE_SCORE_LIMIT: i64 = 100_000;

const ANCHORED_BONUS: i64 = 10_000;
const SELF_SIGNED_TAIL_BONUS: i64 = 1_000;
const PER_LINK_BONUS: i64 = 100;
const WEAK_HASH_PENALTY: i64 = 2_500;

/// Base score from structural path properties. A more complete explanation
/// scores higher: anchored termination beats a self-signed dead end, which
/// beats a dangling chain, and each discovered link adds a little ("expired"
/// is more informative than "no issuer found"). Weak digests cost.
pub fn base_score(path: &CertificatePath) -> i64 {
    let mut score = 0;

    if path.is_anchored() {
        score += ANCHORED_BONUS;
    }
    if path.is_self_signed() {
        score += SELF_SIGNED_TAIL_BONUS;
    }

    score += path.len().min(MAX_CHAIN_LENGTH) as i64 * PER_LINK_BONUS;

    if path.uses_weak_hash() {
        score -= WEAK_HASH_PENALTY;
    }

    debug_assert!(score.abs() < BASE_SCORE_LIMIT);
    score
}

/// Final comparable score for a validated path.
pub fn final_score(path: &CertificatePath, accepted: bool, is_ev: bool) -> i64 {
    let mut score = base_score(path);
    if accepted {
        score += ACCEPT_PATH_SCORE;
    }
    if is_ev {
        score += EV_SCORE_BONUS;
    }
    score
}
