//! Security audit events.
//!
//! Events go out through `tracing` under the `heatrelay::security` target so
//! they can be routed with an ordinary filter such as
//! `RUST_LOG=heatrelay::security=info`. Only hashes and row ids are recorded;
//! plaintext short codes, tokens, and actor identifiers never appear.

use std::fmt;

use tracing::{info, warn};

/// Target every audit event is emitted under.
pub const TARGET: &str = "heatrelay::security";

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityAction {
    /// A pair link was issued.
    ShortCodeGenerated,
    /// A short code lookup succeeded.
    ShortCodeRedeemed,
    /// A short code lookup was refused.
    ShortCodeFailed,
    /// A pair was retired.
    PairDeactivated,
}

impl SecurityAction {
    /// Event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortCodeGenerated => "short_code_generated",
            Self::ShortCodeRedeemed => "short_code_redeemed",
            Self::ShortCodeFailed => "short_code_failed",
            Self::PairDeactivated => "pair_deactivated",
        }
    }
}

impl fmt::Display for SecurityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityEvent<'a> {
    /// What happened.
    pub action: SecurityAction,
    /// Hash of the actor, if one was involved.
    pub actor_hash: Option<&'a str>,
    /// Kind of row affected.
    pub resource_type: &'static str,
    /// Row affected, if known.
    pub resource_id: Option<i64>,
    /// `success`, or an error kind.
    pub outcome: &'a str,
}

impl<'a> SecurityEvent<'a> {
    /// A successful action on a row.
    #[must_use]
    pub const fn success(action: SecurityAction, resource_type: &'static str, resource_id: i64) -> Self {
        Self {
            action,
            actor_hash: None,
            resource_type,
            resource_id: Some(resource_id),
            outcome: "success",
        }
    }

    /// A refused action.
    #[must_use]
    pub const fn failure(action: SecurityAction, resource_type: &'static str, outcome: &'a str) -> Self {
        Self {
            action,
            actor_hash: None,
            resource_type,
            resource_id: None,
            outcome,
        }
    }

    /// Attach the actor hash.
    #[must_use]
    pub fn by(mut self, actor_hash: &'a str) -> Self {
        self.actor_hash = Some(actor_hash);
        self
    }

    /// Whether the action went through.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == "success"
    }

    /// Write the event to the log.
    pub fn emit(&self) {
        let actor_hash = self.actor_hash.unwrap_or("-");
        let resource_id = self.resource_id.unwrap_or(0);
        if self.succeeded() {
            info!(
                target: TARGET,
                action = %self.action,
                actor_hash,
                resource_type = self.resource_type,
                resource_id,
                outcome = self.outcome,
                "security event"
            );
        } else {
            warn!(
                target: TARGET,
                action = %self.action,
                actor_hash,
                resource_type = self.resource_type,
                resource_id,
                outcome = self.outcome,
                "security event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_event() {
        let event = SecurityEvent::success(SecurityAction::ShortCodeRedeemed, "pair", 7).by("abc");
        assert!(event.succeeded());
        assert_eq!(event.resource_id, Some(7));
        assert_eq!(event.actor_hash, Some("abc"));
        event.emit();
    }

    #[test]
    fn test_failure_event() {
        let event = SecurityEvent::failure(SecurityAction::ShortCodeFailed, "pair_link", "locked");
        assert!(!event.succeeded());
        assert_eq!(event.resource_id, None);
        event.emit();
    }

    #[test]
    fn test_action_names() {
        assert_eq!(SecurityAction::ShortCodeGenerated.to_string(), "short_code_generated");
        assert_eq!(SecurityAction::PairDeactivated.as_str(), "pair_deactivated");
    }
}
