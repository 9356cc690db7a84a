//! Approval gate for mutating global-store operations.
//!
//! Screening is a verb table lookup against the operation description.
//! When it matches, the driver suspends the run with a pending
//! `ApprovalRequest`; only an external `resume` call can clear it. The
//! guarded retrieval path requires an `ApprovalToken`, which can only be
//! minted from a request that was actually approved — that single
//! construction point is what keeps the write path auditable.

use crate::state::{ApprovalDecision, ApprovalRequest, ApprovalStatus};
use uuid::Uuid;

/// Proof that a specific approval request was decided APPROVED.
///
/// Deliberately has no public constructor: the only way to obtain one is
/// `decide(..., Approved)`.
#[derive(Debug, Clone)]
pub struct ApprovalToken {
    request_id: Uuid,
}

impl ApprovalToken {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

/// Check an operation description against the mutation verb table.
/// Returns the first matching verb (case-insensitive substring match).
pub fn screen_mutation(description: &str, verbs: &[String]) -> Option<String> {
    let haystack = description.to_lowercase();
    verbs
        .iter()
        .find(|v| !v.is_empty() && haystack.contains(&v.to_lowercase()))
        .cloned()
}

/// Outcome of recording a decision on a request.
#[derive(Debug)]
pub enum Decided {
    Approved(ApprovalToken),
    Rejected,
    /// The request was already decided; the prior status is returned and
    /// nothing was re-applied.
    AlreadyDecided(ApprovalStatus),
}

/// Record `decision` on `request`. Idempotent: a request transitions out
/// of PENDING exactly once, and a second call is a no-op reporting the
/// recorded status.
pub fn decide(request: &mut ApprovalRequest, decision: ApprovalDecision) -> Decided {
    if !request.is_pending() {
        return Decided::AlreadyDecided(request.status);
    }
    match decision {
        ApprovalDecision::Approved => {
            request.status = ApprovalStatus::Approved;
            tracing::info!(
                request_id = %request.id,
                verb = %request.matched_verb,
                "mutating operation approved"
            );
            Decided::Approved(ApprovalToken {
                request_id: request.id,
            })
        }
        ApprovalDecision::Rejected => {
            request.status = ApprovalStatus::Rejected;
            tracing::info!(request_id = %request.id, "mutating operation rejected");
            Decided::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verbs() -> Vec<String> {
        vec![
            "create".to_string(),
            "update".to_string(),
            "delete".to_string(),
            "merge".to_string(),
        ]
    }

    #[test]
    fn screen_matches_case_insensitively() {
        assert_eq!(
            screen_mutation("MERGE the auth nodes", &verbs()),
            Some("merge".to_string())
        );
        assert_eq!(
            screen_mutation("please Delete stale entries", &verbs()),
            Some("delete".to_string())
        );
    }

    #[test]
    fn screen_passes_plain_reads() {
        assert!(screen_mutation("is there a pattern for this?", &verbs()).is_none());
        assert!(screen_mutation("", &verbs()).is_none());
    }

    #[test]
    fn screen_honors_configured_table() {
        let custom = vec!["drop".to_string()];
        assert!(screen_mutation("MERGE something", &custom).is_none());
        assert_eq!(
            screen_mutation("drop the index", &custom),
            Some("drop".to_string())
        );
    }

    #[test]
    fn approve_yields_token_for_that_request() {
        let mut req = ApprovalRequest::new("CREATE node", "create");
        match decide(&mut req, ApprovalDecision::Approved) {
            Decided::Approved(token) => assert_eq!(token.request_id(), req.id),
            other => panic!("expected Approved, got {other:?}"),
        }
        assert_eq!(req.status, ApprovalStatus::Approved);
    }

    #[test]
    fn reject_is_terminal() {
        let mut req = ApprovalRequest::new("DELETE node", "delete");
        assert!(matches!(
            decide(&mut req, ApprovalDecision::Rejected),
            Decided::Rejected
        ));
        assert_eq!(req.status, ApprovalStatus::Rejected);
    }

    #[test]
    fn second_decision_is_a_no_op() {
        let mut req = ApprovalRequest::new("UPDATE node", "update");
        let _ = decide(&mut req, ApprovalDecision::Approved);
        // A later, contradictory decision does not flip the status.
        match decide(&mut req, ApprovalDecision::Rejected) {
            Decided::AlreadyDecided(status) => assert_eq!(status, ApprovalStatus::Approved),
            other => panic!("expected AlreadyDecided, got {other:?}"),
        }
        assert_eq!(req.status, ApprovalStatus::Approved);
    }
}
