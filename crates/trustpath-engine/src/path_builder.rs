//! The path-building state machine.
//!
//! [`PathBuilder`] drives a bounded, cooperative backtracking search over a
//! path graph that is discovered incrementally:
//!
//! 1. **ProcessLeaf** — pinning augmentation, leaf anchor detection,
//!    leaf-only policy checks
//! 2. **GetNext** — search driver: drain candidates, reconsider rejects,
//!    widen the source scope, or extend the current partial
//! 3. **ExtendPaths** — classify each newly discovered parent edge
//! 4. **ValidatePath** — start revocation jobs, run per-path policy checks
//! 5. **DidValidatePath** — aggregate verdicts once revocation settles,
//!    accept or reject, update the best path
//! 6. **ComputeDetails** — re-run the check set against the winner to
//!    populate per-certificate diagnostics
//! 7. **ReportResult** — assemble the evaluation; terminal
//!
//! A state function returning `false` means the search is suspended on a
//! deferred collaborator (parent fetch or revocation job); the matching
//! `provide_parents` / `provide_revocation` call resumes the driver. All
//! state lives on the builder and is mutated by exactly one logical owner;
//! the `activations` counter makes a nested driver entry from a synchronous
//! completion a no-op, so the outermost activation finishes the loop and the
//! completion callback fires exactly once.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::certificate::{Certificate, CertificateId, KeyIdVerifier, SharedVerifier};
use crate::certificate_path::CertificatePath;
use crate::certificate_source::{
    AnchorRole, AnchorSource, CertificateSource, FetchTicket, MemoryCertificateSource,
    ParentFetch, UsageConstraint, anchor_trust_permitted,
};
use crate::path_graph::{Interned, MAX_CHAIN_LENGTH, PathGraph, PathHandle};
use crate::path_score::final_score;
use crate::policy_context::{
    BasicX509Policy, CertificateDiagnostics, CheckName, CtLogSet, PathCheckContext,
    PinningProvider, PolicyVerificationContext, SharedPolicy, SignedCertificateTimestamp,
    TrustExceptions,
};
use crate::revocation::{
    NullRevocationChecker, RevocationCheck, RevocationChecker, RevocationStatus, RevocationTicket,
    StapledOcspResponse,
};
use crate::trust_result::{EvaluationInfo, TrustBuildError, TrustEvaluation, TrustResult};

// ---------------------------------------------------------------------------
// Construction inputs
// ---------------------------------------------------------------------------

/// Declarative inputs of one evaluation.
pub struct BuildParameters {
    /// Leaf-first certificate array. Must be non-empty; everything past the
    /// leaf seeds an in-memory parent source.
    pub certificates: Vec<Arc<Certificate>>,
    /// Caller-provided anchors with their usage constraints (user role).
    pub anchors: Vec<(Arc<Certificate>, Vec<UsageConstraint>)>,
    /// Restrict anchoring to the caller-provided anchors.
    pub anchors_only: bool,
    /// Allow keychain-style item stores as parent sources.
    pub keychains_allowed: bool,
    /// Policies to evaluate; empty means the baseline X.509 policy.
    pub policies: Vec<SharedPolicy>,
    pub stapled_ocsp: BTreeMap<CertificateId, StapledOcspResponse>,
    pub stapled_scts: Vec<SignedCertificateTimestamp>,
    pub trusted_ct_logs: CtLogSet,
    pub verify_time: DateTime<Utc>,
    /// Access groups scoping keychain-store lookups; applied to every
    /// keychain source at construction. Empty leaves the sources' own
    /// scoping in place.
    pub access_groups: Vec<String>,
    pub exceptions: TrustExceptions,
}

impl BuildParameters {
    pub fn new(certificates: Vec<Arc<Certificate>>, verify_time: DateTime<Utc>) -> Self {
        Self {
            certificates,
            anchors: Vec::new(),
            anchors_only: false,
            keychains_allowed: true,
            policies: Vec::new(),
            stapled_ocsp: BTreeMap::new(),
            stapled_scts: Vec::new(),
            trusted_ct_logs: CtLogSet::default(),
            verify_time,
            access_groups: Vec::new(),
            exceptions: TrustExceptions::none(),
        }
    }
}

/// External collaborators of one evaluation. Everything here is explicit
/// configuration; the engine holds no process-wide source singletons.
pub struct Collaborators {
    /// Anchor stores beyond the caller-provided anchors (system roots).
    /// Ignored when the build is anchors-only.
    pub anchor_sources: Vec<Box<dyn CertificateSource>>,
    /// Parent sources consulted in registration order after the input
    /// certificates (CA-issuer network fetch and the like).
    pub parent_sources: Vec<Box<dyn CertificateSource>>,
    /// Keychain-style stores, consulted only when keychains are allowed.
    pub keychain_sources: Vec<Box<dyn CertificateSource>>,
    pub revocation: Box<dyn RevocationChecker>,
    pub verifier: SharedVerifier,
    pub pinning: Option<Box<dyn PinningProvider>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            anchor_sources: Vec::new(),
            parent_sources: Vec::new(),
            keychain_sources: Vec::new(),
            revocation: Box::new(NullRevocationChecker),
            verifier: Arc::new(KeyIdVerifier),
            pinning: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderState {
    ProcessLeaf,
    GetNext,
    ValidatePath,
    DidValidatePath,
    ComputeDetails,
    ReportResult,
}

#[derive(Debug, Clone, Copy)]
struct PendingFetch {
    ticket: FetchTicket,
    partial: PathHandle,
    source_ix: usize,
}

#[derive(Debug, Clone, Copy)]
struct PendingRevocation {
    path: PathHandle,
    cert_ix: usize,
}

type CompletionFn = Box<dyn FnOnce(&TrustEvaluation)>;

/// The search engine. One instance per evaluation; single logical owner.
pub struct PathBuilder {
    // collaborators
    anchor_sources: Vec<Box<dyn CertificateSource>>,
    parent_sources: Vec<Box<dyn CertificateSource>>,
    revocation: Box<dyn RevocationChecker>,
    verifier: SharedVerifier,
    pinning: Option<Box<dyn PinningProvider>>,

    // inputs
    leaf: Arc<Certificate>,
    verify_time: DateTime<Utc>,
    stapled_ocsp: BTreeMap<CertificateId, StapledOcspResponse>,
    stapled_scts: Vec<SignedCertificateTimestamp>,
    trusted_ct_logs: CtLogSet,
    exceptions: TrustExceptions,

    // search state
    graph: PathGraph,
    pvcs: Vec<PolicyVerificationContext>,
    state: Option<BuilderState>,
    activations: u32,
    partial_ix: Option<usize>,
    next_parent_source: usize,
    consider_rejected: bool,
    consider_partials: bool,
    current: Option<PathHandle>,
    best: Option<PathHandle>,
    best_score: Option<i64>,
    best_accepted: bool,

    // suspension bookkeeping
    pending_fetch: Option<PendingFetch>,
    pending_revocations: BTreeMap<u64, PendingRevocation>,
    outstanding_jobs: usize,
    next_ticket: u64,

    // output
    details: Vec<CertificateDiagnostics>,
    evaluation: Option<TrustEvaluation>,
    completion: Option<CompletionFn>,
}

impl PathBuilder {
    pub fn new(
        params: BuildParameters,
        collaborators: Collaborators,
    ) -> Result<Self, TrustBuildError> {
        let Some(leaf) = params.certificates.first().cloned() else {
            return Err(TrustBuildError::InvalidCertificates);
        };

        let mut anchor_sources: Vec<Box<dyn CertificateSource>> = Vec::new();
        if !params.anchors.is_empty() {
            let mut user_anchors = AnchorSource::user();
            for (cert, constraints) in params.anchors {
                user_anchors.add_anchor(cert, constraints);
            }
            anchor_sources.push(Box::new(user_anchors));
        }
        if !params.anchors_only {
            anchor_sources.extend(collaborators.anchor_sources);
        }

        let mut parent_sources: Vec<Box<dyn CertificateSource>> = Vec::new();
        if params.certificates.len() > 1 {
            parent_sources.push(Box::new(MemoryCertificateSource::new(
                params.certificates[1..].iter().cloned(),
            )));
        }
        parent_sources.extend(collaborators.parent_sources);
        if params.keychains_allowed {
            let mut keychains = collaborators.keychain_sources;
            for source in &mut keychains {
                source.restrict_access_groups(&params.access_groups);
            }
            parent_sources.extend(keychains);
        }

        let policies = if params.policies.is_empty() {
            vec![Arc::new(BasicX509Policy) as SharedPolicy]
        } else {
            params.policies
        };
        let pvcs = policies
            .into_iter()
            .map(PolicyVerificationContext::new)
            .collect();

        let next_parent_source = parent_sources.len().min(1);

        Ok(Self {
            anchor_sources,
            parent_sources,
            revocation: collaborators.revocation,
            verifier: collaborators.verifier,
            pinning: collaborators.pinning,
            leaf,
            verify_time: params.verify_time,
            stapled_ocsp: params.stapled_ocsp,
            stapled_scts: params.stapled_scts,
            trusted_ct_logs: params.trusted_ct_logs,
            exceptions: params.exceptions,
            graph: PathGraph::new(),
            pvcs,
            state: Some(BuilderState::ProcessLeaf),
            activations: 0,
            partial_ix: None,
            next_parent_source,
            consider_rejected: false,
            consider_partials: false,
            current: None,
            best: None,
            best_score: None,
            best_accepted: false,
            pending_fetch: None,
            pending_revocations: BTreeMap::new(),
            outstanding_jobs: 0,
            next_ticket: 1,
            details: Vec::new(),
            evaluation: None,
            completion: None,
        })
    }

    /// Register the completion callback. Invoked exactly once, when the
    /// search reaches its terminal state with no activation in flight.
    pub fn on_complete(&mut self, completion: CompletionFn) {
        self.completion = Some(completion);
    }

    // -- public observation ------------------------------------------------

    pub fn is_complete(&self) -> bool {
        self.state.is_none()
    }

    pub fn best_score(&self) -> Option<i64> {
        self.best_score
    }

    pub fn path_count(&self) -> usize {
        self.graph.path_count()
    }

    pub fn graph(&self) -> &PathGraph {
        &self.graph
    }

    pub fn evaluation(&self) -> Option<&TrustEvaluation> {
        self.evaluation.as_ref()
    }

    pub fn take_evaluation(&mut self) -> Option<TrustEvaluation> {
        self.evaluation.take()
    }

    /// Human-readable description of the collaborator the search is
    /// suspended on, if any.
    pub fn waiting_on(&self) -> Option<String> {
        if let Some(pending) = &self.pending_fetch {
            return Some(format!(
                "parent fetch from `{}`",
                self.source_at(pending.source_ix).name()
            ));
        }
        if !self.pending_revocations.is_empty() {
            return Some(format!(
                "{} outstanding revocation job(s)",
                self.pending_revocations.len()
            ));
        }
        None
    }

    // -- driver ------------------------------------------------------------

    /// Run the state machine until it terminates or suspends on a deferred
    /// collaborator. Returns `true` while the search is still alive
    /// (suspended), `false` once the result is final.
    pub fn step(&mut self) -> bool {
        if self.activations > 0 {
            // Nested entry from a synchronous completion; the outermost
            // activation finishes the loop.
            return true;
        }
        self.activations += 1;
        while let Some(state) = self.state {
            if !self.run_state(state) {
                break;
            }
        }
        self.activations -= 1;
        if self.state.is_some() {
            return true;
        }
        self.fire_completion();
        false
    }

    fn run_state(&mut self, state: BuilderState) -> bool {
        match state {
            BuilderState::ProcessLeaf => self.step_process_leaf(),
            BuilderState::GetNext => self.step_get_next(),
            BuilderState::ValidatePath => self.step_validate_path(),
            BuilderState::DidValidatePath => self.step_did_validate_path(),
            BuilderState::ComputeDetails => self.step_compute_details(),
            BuilderState::ReportResult => self.step_report_result(),
        }
    }

    fn fire_completion(&mut self) {
        if let (Some(completion), Some(evaluation)) = (self.completion.take(), &self.evaluation) {
            completion(evaluation);
        }
    }

    /// Resume a deferred parent fetch. `parents` follows the source
    /// contract: an array (possibly empty) or `None`.
    pub fn provide_parents(
        &mut self,
        ticket: FetchTicket,
        parents: Option<Vec<Arc<Certificate>>>,
    ) -> Result<(), TrustBuildError> {
        if self.is_complete() {
            return Err(TrustBuildError::AlreadyCompleted);
        }
        match self.pending_fetch {
            Some(pending) if pending.ticket == ticket => {
                self.pending_fetch = None;
                self.process_parents(pending.partial, pending.source_ix, parents);
                self.step();
                Ok(())
            }
            _ => Err(TrustBuildError::StaleTicket { ticket: ticket.0 }),
        }
    }

    /// Resume one deferred revocation job. The path's verdict is
    /// aggregated only once its last outstanding job completes.
    pub fn provide_revocation(
        &mut self,
        ticket: RevocationTicket,
        status: RevocationStatus,
    ) -> Result<(), TrustBuildError> {
        if self.is_complete() {
            return Err(TrustBuildError::AlreadyCompleted);
        }
        let Some(pending) = self.pending_revocations.remove(&ticket.0) else {
            return Err(TrustBuildError::StaleTicket { ticket: ticket.0 });
        };
        self.graph
            .path_mut(pending.path)
            .record_revocation(pending.cert_ix, status);
        self.outstanding_jobs = self.outstanding_jobs.saturating_sub(1);
        if self.outstanding_jobs == 0 {
            self.graph.path_mut(pending.path).set_revocation_done();
            self.step();
        }
        Ok(())
    }

    // -- state functions ---------------------------------------------------

    fn step_process_leaf(&mut self) -> bool {
        if let Some(pinning) = self.pinning.take() {
            for policy in pinning.policies_for_leaf(&self.leaf) {
                self.pvcs.push(PolicyVerificationContext::new(policy));
            }
        }

        let mut path = CertificatePath::new_leaf(self.leaf.clone());
        path.set_ct(self.trusted_ct_logs.satisfied_by(&self.stapled_scts));

        // A self-signed leaf found in an anchor store is a one-node
        // candidate chain.
        if self.leaf.is_self_issued() {
            if let Some((role, constraints)) = self.anchor_lookup(&self.leaf.clone()) {
                path.mark_anchored(role, constraints);
                if self.verifier.signature_valid(&self.leaf, &self.leaf) {
                    path.mark_self_signed();
                }
            }
        }

        let handle = match self.graph.intern(path) {
            Interned::Inserted(handle) | Interned::Duplicate(handle) => handle,
        };
        if self.graph.path(handle).is_anchored() {
            self.graph.candidate_paths.push(handle);
        } else {
            self.graph.partial_paths.push(handle);
            self.partial_ix = Some(0);
        }

        let verify_time = self.verify_time;
        let leaf = self.leaf.clone();
        for pvc in &mut self.pvcs {
            pvc.run_leaf_checks(&leaf, verify_time);
        }
        if self.pvcs.iter().all(PolicyVerificationContext::leaf_rejected) {
            // Every policy already rejects the leaf; widen immediately so
            // the most informative rejection is found without wasted
            // narrow-scope passes.
            self.consider_rejected = true;
        }

        self.state = Some(BuilderState::GetNext);
        true
    }

    fn step_get_next(&mut self) -> bool {
        // Candidates are validated eagerly: they are the road to early
        // acceptance.
        if !self.graph.candidate_paths.is_empty() {
            let handle = self.graph.candidate_paths.remove(0);
            self.current = Some(handle);
            self.state = Some(BuilderState::ValidatePath);
            return true;
        }

        // Reconsider one rejected path per step once the search widened.
        if self.consider_rejected && !self.graph.rejected_paths.is_empty() {
            let handle = self.graph.rejected_paths.remove(0);
            self.classify_path(handle, false);
            return true;
        }

        // Cursor exhausted: widen the search, cheapest option first.
        let Some(ix) = self.partial_ix else {
            if self.next_parent_source < self.parent_sources.len() {
                self.next_parent_source += 1;
            } else if !self.consider_rejected {
                self.consider_rejected = true;
            } else if !self.consider_partials {
                self.consider_partials = true;
            } else {
                self.state = Some(BuilderState::ComputeDetails);
                return true;
            }
            self.partial_ix = self.graph.partial_paths.len().checked_sub(1);
            return true;
        };

        let handle = self.graph.partial_paths[ix];

        // Last resort: present bare partials (dead-end chains) for
        // validation so the caller gets the most complete diagnostics.
        if self.consider_partials {
            self.retreat_cursor();
            self.current = Some(handle);
            self.state = Some(BuilderState::ValidatePath);
            return true;
        }

        // Bounds: stop growing the graph, keep draining what exists.
        if self.graph.at_capacity() || self.graph.path(handle).len() >= MAX_CHAIN_LENGTH {
            self.retreat_cursor();
            return true;
        }

        let source_ix = self.graph.path(handle).next_source();
        if source_ix >= self.sources_in_scope() {
            self.retreat_cursor();
            return true;
        }
        self.graph.path_mut(handle).advance_source();

        let tail = self.graph.path(handle).tail().clone();
        let ticket = self.issue_ticket();
        match self
            .source_at_mut(source_ix)
            .copy_parents(&tail, FetchTicket(ticket))
        {
            ParentFetch::Ready(parents) => {
                self.process_parents(handle, source_ix, parents);
                true
            }
            ParentFetch::Pending(ticket) => {
                self.pending_fetch = Some(PendingFetch {
                    ticket,
                    partial: handle,
                    source_ix,
                });
                false
            }
        }
    }

    /// ExtendPaths: classify every parent edge the source produced. Runs
    /// either synchronously from GetNext or from `provide_parents`.
    fn process_parents(
        &mut self,
        partial: PathHandle,
        source_ix: usize,
        parents: Option<Vec<Arc<Certificate>>>,
    ) {
        for parent in parents.unwrap_or_default() {
            let tail = self.graph.path(partial).tail().clone();
            if parent.id() == tail.id() {
                // Trivial self-loop; note a verified self-signature for
                // self-signed-root detection.
                if tail.is_self_issued() && self.verifier.signature_valid(&tail, &tail) {
                    self.graph.path_mut(partial).mark_self_signed();
                }
                continue;
            }
            if self.graph.path(partial).contains_certificate(parent.id()) {
                // Discovery looped back onto an ancestor.
                self.graph.path_mut(partial).note_cycle();
                continue;
            }
            if self.graph.at_capacity() {
                continue;
            }
            let constraints = self.source_at(source_ix).usage_constraints(&parent);
            let role = self.source_at(source_ix).anchor_role();
            let mut extended = self.graph.path(partial).extending(parent, constraints, role);
            let extended_tail = extended.tail().clone();
            if extended_tail.is_self_issued()
                && self.verifier.signature_valid(&extended_tail, &extended_tail)
            {
                extended.mark_self_signed();
            }
            match self.graph.intern(extended) {
                Interned::Duplicate(_) => {}
                Interned::Inserted(handle) => self.classify_path(handle, true),
            }
        }
        // Control returns to the search driver.
        self.state = Some(BuilderState::GetNext);
    }

    /// The "is it partial" predicate: route a path to the rejected,
    /// candidate or partial list, or drop it as unreachable.
    fn classify_path(&mut self, handle: PathHandle, depth_first: bool) {
        // Static per-parent checks. A path every policy rejects is inert
        // until the search widens to reconsider rejects.
        if !self.consider_rejected && !self.static_checks_pass(handle) {
            self.graph.rejected_paths.push(handle);
            return;
        }

        // A cryptographically broken chain never becomes reachable; the
        // interned entry only blocks reconstruction of the same sequence.
        if !self.chain_signatures_valid(handle) {
            return;
        }

        if self.graph.path(handle).is_anchored() {
            self.graph.candidate_paths.push(handle);
            return;
        }

        // Terminal but unanchored: a dead end on the first pass, an
        // acceptable explanation once richer options are exhausted.
        let path = self.graph.path(handle);
        if path.is_self_signed() || path.has_cycle() {
            if self.consider_rejected {
                self.graph.candidate_paths.push(handle);
            } else {
                self.graph.rejected_paths.push(handle);
            }
            return;
        }

        // A genuine partial, eligible for further extension. Depth-first
        // bias: the newest partial lands right after the cursor and is
        // explored next.
        if depth_first {
            if let Some(ix) = self.partial_ix {
                self.graph.partial_paths.insert(ix + 1, handle);
                self.partial_ix = Some(ix + 1);
                return;
            }
        }
        self.graph.partial_paths.push(handle);
        if self.partial_ix.is_none() {
            self.partial_ix = Some(self.graph.partial_paths.len() - 1);
        }
    }

    fn step_validate_path(&mut self) -> bool {
        let handle = self.current.expect("ValidatePath requires a current path");

        for pvc in &mut self.pvcs {
            pvc.reset_for_path();
        }

        let outstanding = self.start_revocation(handle);

        let ctx = PathCheckContext {
            verify_time: self.verify_time,
        };
        let path = self.graph.path(handle);
        for pvc in &mut self.pvcs {
            pvc.run_path_checks(path, &ctx);
        }

        self.state = Some(BuilderState::DidValidatePath);
        // Suspend until the last outstanding revocation job reports in.
        outstanding == 0
    }

    fn start_revocation(&mut self, handle: PathHandle) -> usize {
        if self.graph.path(handle).revocation_done() {
            return 0;
        }
        let len = self.graph.path(handle).len();
        let mut outstanding = 0;
        for cert_ix in 0..len.saturating_sub(1) {
            if self.graph.path(handle).revocation_at(cert_ix).is_some() {
                // Carried over from the prefix path.
                continue;
            }
            let cert = self.graph.path(handle).cert_at(cert_ix).clone();
            let issuer = self.graph.path(handle).cert_at(cert_ix + 1).clone();
            let stapled = self.stapled_ocsp.get(&cert.id()).cloned();
            let ticket = RevocationTicket(self.issue_ticket());
            match self
                .revocation
                .check(&cert, Some(&issuer), stapled.as_ref(), ticket)
            {
                RevocationCheck::Ready(status) => {
                    self.graph.path_mut(handle).record_revocation(cert_ix, status);
                }
                RevocationCheck::Pending(ticket) => {
                    self.pending_revocations
                        .insert(ticket.0, PendingRevocation {
                            path: handle,
                            cert_ix,
                        });
                    outstanding += 1;
                }
            }
        }
        self.outstanding_jobs = outstanding;
        if outstanding == 0 {
            self.graph.path_mut(handle).set_revocation_done();
        }
        outstanding
    }

    fn step_did_validate_path(&mut self) -> bool {
        let handle = self
            .current
            .take()
            .expect("DidValidatePath requires a current path");

        let is_ev = {
            let path = self.graph.path(handle);
            path.is_optionally_ev() && path.revocation_all_good()
        };
        self.graph.path_mut(handle).set_ev(is_ev);

        let revoked = self.graph.path(handle).revocation_reason().is_some();
        let accepted = !revoked
            && self
                .pvcs
                .iter()
                .any(|pvc| pvc.accepted(&self.exceptions));

        let score = final_score(self.graph.path(handle), accepted, is_ev);
        self.graph.path_mut(handle).set_score(score);
        if self.best_score.map_or(true, |best| score > best) {
            self.best = Some(handle);
            self.best_score = Some(score);
            self.best_accepted = accepted;
        }

        // An accepted EV path with no weak digest cannot be improved on;
        // everything else keeps searching for a better accept.
        let path = self.graph.path(handle);
        if accepted && path.is_ev() && !path.uses_weak_hash() {
            self.state = Some(BuilderState::ComputeDetails);
        } else {
            self.state = Some(BuilderState::GetNext);
        }
        true
    }

    fn step_compute_details(&mut self) -> bool {
        let Some(best) = self.best else {
            self.details = Vec::new();
            self.state = Some(BuilderState::ReportResult);
            return true;
        };

        // The winner may not be the last path checked; re-run the check
        // set against it so the diagnostics describe the reported chain.
        for pvc in &mut self.pvcs {
            pvc.reset_for_path();
        }
        let ctx = PathCheckContext {
            verify_time: self.verify_time,
        };
        let path = self.graph.path(best);
        for pvc in &mut self.pvcs {
            pvc.run_path_checks(path, &ctx);
        }

        let path = self.graph.path(best);
        let len = path.len();
        let mut details = vec![CertificateDiagnostics::default(); len];

        for pvc in &self.pvcs {
            for failure in pvc.leaf_failures() {
                details[0]
                    .failures
                    .entry(failure.check)
                    .or_insert_with(|| failure.message.clone());
            }
            if let Some(verdict) = pvc.verdict() {
                for failure in &verdict.failures {
                    if self.exceptions.allows(failure.cert_index, failure.check) {
                        continue;
                    }
                    details[failure.cert_index]
                        .failures
                        .entry(failure.check)
                        .or_insert_with(|| failure.message.clone());
                }
            }
        }

        for cert_ix in 0..len.saturating_sub(1) {
            let child = path.cert_at(cert_ix);
            let parent = path.cert_at(cert_ix + 1);
            let any_ok = self
                .pvcs
                .iter()
                .any(|pvc| pvc.parent_checks(child, parent, self.verify_time));
            if !any_ok {
                details[cert_ix + 1]
                    .failures
                    .entry(CheckName::IssuerLinkage)
                    .or_insert_with(|| "no policy accepts this issuer link".to_string());
            }
            if let Some(RevocationStatus::Revoked { reason }) = path.revocation_at(cert_ix) {
                details[cert_ix]
                    .failures
                    .insert(CheckName::Revocation, format!("revoked: {reason}"));
            }
        }

        self.details = details;
        self.state = Some(BuilderState::ReportResult);
        true
    }

    fn step_report_result(&mut self) -> bool {
        let evaluation = match self.best {
            None => TrustEvaluation {
                chain: vec![self.leaf.clone()],
                details: Vec::new(),
                info: EvaluationInfo::default(),
                result: TrustResult::RecoverableTrustFailure,
                score: 0,
            },
            Some(best) => {
                let path = self.graph.path(best);
                let score = path.score().unwrap_or(0);
                let revoked = path.revocation_reason().is_some();
                // Classification follows the recorded policy verdict; a
                // user-excepted weak-digest path is accepted even though
                // its score stays below the accept bonus.
                let accepted = self.best_accepted;
                let result = if revoked {
                    TrustResult::FatalTrustFailure
                } else if accepted {
                    if path.anchor_role() == Some(AnchorRole::User) {
                        TrustResult::Proceed
                    } else {
                        TrustResult::Unspecified
                    }
                } else {
                    TrustResult::RecoverableTrustFailure
                };
                TrustEvaluation {
                    chain: path.certs().to_vec(),
                    details: mem::take(&mut self.details),
                    info: EvaluationInfo {
                        extended_validation: path.is_ev(),
                        certificate_transparency: path.is_ct(),
                        revocation_checked: revoked || path.revocation_all_good(),
                        revocation_valid_until: if path.revocation_all_good() {
                            path.revocation_valid_until()
                        } else {
                            None
                        },
                        revocation_reason: path.revocation_reason(),
                    },
                    result,
                    score,
                }
            }
        };
        self.evaluation = Some(evaluation);
        self.state = None;
        true
    }

    // -- helpers -----------------------------------------------------------

    fn issue_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn retreat_cursor(&mut self) {
        self.partial_ix = match self.partial_ix {
            Some(0) | None => None,
            Some(ix) => Some(ix - 1),
        };
    }

    fn sources_in_scope(&self) -> usize {
        self.anchor_sources.len() + self.next_parent_source
    }

    fn source_at(&self, ix: usize) -> &dyn CertificateSource {
        if ix < self.anchor_sources.len() {
            self.anchor_sources[ix].as_ref()
        } else {
            self.parent_sources[ix - self.anchor_sources.len()].as_ref()
        }
    }

    fn source_at_mut(&mut self, ix: usize) -> &mut dyn CertificateSource {
        if ix < self.anchor_sources.len() {
            self.anchor_sources[ix].as_mut()
        } else {
            self.parent_sources[ix - self.anchor_sources.len()].as_mut()
        }
    }

    /// First anchor source vouching for `cert` with constraints that
    /// permit anchoring.
    fn anchor_lookup(
        &self,
        cert: &Arc<Certificate>,
    ) -> Option<(AnchorRole, Option<Vec<UsageConstraint>>)> {
        for source in &self.anchor_sources {
            if !source.contains(cert) {
                continue;
            }
            let constraints = source.usage_constraints(cert);
            if anchor_trust_permitted(constraints.as_deref().unwrap_or(&[])) {
                let role = source.anchor_role().unwrap_or(AnchorRole::System);
                return Some((role, constraints));
            }
        }
        None
    }

    /// Any policy passes the static parent checks for the path's newest
    /// link. One-node paths pass vacuously.
    fn static_checks_pass(&self, handle: PathHandle) -> bool {
        let path = self.graph.path(handle);
        if path.len() < 2 {
            return true;
        }
        let child = path.cert_at(path.len() - 2);
        let parent = path.tail();
        self.pvcs
            .iter()
            .any(|pvc| pvc.parent_checks(child, parent, self.verify_time))
    }

    /// Every signature link of the accumulated chain verifies.
    fn chain_signatures_valid(&self, handle: PathHandle) -> bool {
        let path = self.graph.path(handle);
        (0..path.len() - 1).all(|ix| {
            self.verifier
                .signature_valid(path.cert_at(ix), path.cert_at(ix + 1))
        })
    }
}

// ---------------------------------------------------------------------------
// Blocking wrapper
// ---------------------------------------------------------------------------

/// Blocking evaluation for callers that cannot be asynchronous. Requires
/// synchronous collaborators: a deferred source or revocation job is
/// reported as [`TrustBuildError::CollaboratorPending`] instead of
/// waiting for a resume that nobody will deliver.
pub fn evaluate_trust(
    params: BuildParameters,
    collaborators: Collaborators,
) -> Result<TrustEvaluation, TrustBuildError> {
    let mut builder = PathBuilder::new(params, collaborators)?;
    if builder.step() {
        let waiting_on = builder
            .waiting_on()
            .unwrap_or_else(|| "unknown collaborator".to_string());
        return Err(TrustBuildError::CollaboratorPending { waiting_on });
    }
    Ok(builder
        .take_evaluation()
        .expect("terminated builder holds an evaluation"))
}
