//! Human-in-the-loop gates.
//!
//! [`ApprovalGate`] and [`AuthGate`] are single-slot resolvers: the loop parks
//! on a pending request and the front end answers it. Only one request can be
//! pending at a time; a second one is refused with [`GateError::Busy`] rather
//! than replacing the first.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::tools::integrations::AuthRequired;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("another request is already awaiting a response")]
    Busy,
}

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub description: String,
    pub args: serde_json::Value,
    pub is_external_integration: bool,
    pub display_name: String,
    pub details: Option<String>,
}

struct Pending<R> {
    request: R,
    responder: oneshot::Sender<bool>,
}

struct ResolverSlot<R> {
    pending: Mutex<Option<Pending<R>>>,
    settled: Notify,
}

impl<R: Clone> ResolverSlot<R> {
    fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            settled: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending<R>>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn open(&self, request: R) -> Result<oneshot::Receiver<bool>, GateError> {
        let mut slot = self.lock();
        // A waiter that went away leaves a closed sender behind; reuse the slot
        if slot.as_ref().is_some_and(|p| !p.responder.is_closed()) {
            return Err(GateError::Busy);
        }
        let (responder, receiver) = oneshot::channel();
        *slot = Some(Pending { request, responder });
        Ok(receiver)
    }

    fn resolve(&self, value: bool) -> bool {
        let taken = self.lock().take();
        let delivered = match taken {
            Some(pending) => pending.responder.send(value).is_ok(),
            None => false,
        };
        self.settled.notify_waiters();
        delivered
    }

    /// Returns once nothing is pending.
    async fn settled(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.current().is_none() {
                return;
            }
            notified.await;
        }
    }

    fn current(&self) -> Option<R> {
        self.lock()
            .as_ref()
            .filter(|p| !p.responder.is_closed())
            .map(|p| p.request.clone())
    }
}

/// A request that has been registered and is waiting for its answer.
#[derive(Debug)]
pub struct PendingResponse {
    receiver: oneshot::Receiver<bool>,
}

impl PendingResponse {
    /// Wait for the answer. A gate dropped without answering counts as `false`.
    pub async fn wait(self) -> bool {
        self.receiver.await.unwrap_or(false)
    }
}

pub struct ApprovalGate {
    slot: ResolverSlot<ApprovalRequest>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self {
            slot: ResolverSlot::new(),
        }
    }

    /// Register `request` without waiting, so the caller can notify the UI
    /// between registering and parking.
    pub fn open(&self, request: ApprovalRequest) -> Result<PendingResponse, GateError> {
        debug!("Approval requested for {}", request.tool_name);
        let receiver = self.slot.open(request)?;
        Ok(PendingResponse { receiver })
    }

    pub async fn request(&self, request: ApprovalRequest) -> Result<bool, GateError> {
        Ok(self.open(request)?.wait().await)
    }

    /// Answer the pending request. Returns false if nothing was pending.
    pub fn resolve(&self, approved: bool) -> bool {
        let delivered = self.slot.resolve(approved);
        if !delivered {
            warn!("No pending approval to resolve");
        }
        delivered
    }

    /// Deny whatever is pending; harmless when idle.
    pub fn cancel(&self) {
        if self.slot.resolve(false) {
            debug!("Pending approval cancelled");
        }
    }

    pub fn pending(&self) -> Option<ApprovalRequest> {
        self.slot.current()
    }

    pub fn is_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// Completes when the pending request is answered or cancelled, so a
    /// front end can withdraw its prompt.
    pub async fn settled(&self) {
        self.slot.settled().await
    }
}

/// Slot for "external authentication required". Completion carries no
/// answer; cancellation tells the waiter to give up.
pub struct AuthGate {
    slot: ResolverSlot<AuthRequired>,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthGate {
    pub fn new() -> Self {
        Self {
            slot: ResolverSlot::new(),
        }
    }

    pub fn open(&self, request: AuthRequired) -> Result<PendingResponse, GateError> {
        debug!("Authentication requested for {}", request.toolkit);
        let receiver = self.slot.open(request)?;
        Ok(PendingResponse { receiver })
    }

    /// Wait until the user finishes authenticating. Returns false if the
    /// wait was cancelled.
    pub async fn request(&self, request: AuthRequired) -> Result<bool, GateError> {
        Ok(self.open(request)?.wait().await)
    }

    pub fn complete(&self) -> bool {
        self.slot.resolve(true)
    }

    pub fn cancel(&self) {
        self.slot.resolve(false);
    }

    pub fn pending(&self) -> Option<AuthRequired> {
        self.slot.current()
    }

    pub async fn settled(&self) {
        self.slot.settled().await
    }
}

/// Tools that never need approval.
pub const AUTO_APPROVED_TOOLS: &[&str] = &[
    "screenshot",
    "read_state",
    "read_selection",
    "remember",
    "recall",
    "wait",
    "final_answer",
];

/// Tools approved on every call rather than once per run.
pub const PER_CALL_APPROVAL_TOOLS: &[&str] = &["replace_text"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalCategory {
    /// Pointer, keyboard, scripts and external integrations
    ComputerUse,
    /// A single call
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Required(ApprovalCategory),
}

/// Decides which tool calls must go through the [`ApprovalGate`]. Holds the
/// categories already approved, so build a fresh one per run.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    auto_approve: HashSet<String>,
    integration_safe: Vec<String>,
    approved: HashSet<ApprovalCategory>,
}

impl ApprovalPolicy {
    pub fn new(auto_approve: &[String], integration_safe: &[String]) -> Self {
        Self {
            auto_approve: auto_approve.iter().cloned().collect(),
            integration_safe: integration_safe.to_vec(),
            approved: HashSet::new(),
        }
    }

    pub fn check(&self, tool_name: &str, is_external: bool) -> ApprovalDecision {
        if self.auto_approve.contains(tool_name) {
            return ApprovalDecision::Approved;
        }

        if is_external {
            if self
                .integration_safe
                .iter()
                .any(|safe| tool_name.contains(safe.as_str()))
            {
                return ApprovalDecision::Approved;
            }
        } else if AUTO_APPROVED_TOOLS.contains(&tool_name) {
            return ApprovalDecision::Approved;
        } else if PER_CALL_APPROVAL_TOOLS.contains(&tool_name) {
            return ApprovalDecision::Required(ApprovalCategory::Call);
        }

        if self.approved.contains(&ApprovalCategory::ComputerUse) {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Required(ApprovalCategory::ComputerUse)
        }
    }

    pub fn record_approval(&mut self, category: ApprovalCategory) {
        if category == ApprovalCategory::ComputerUse {
            self.approved.insert(category);
        }
    }
}
