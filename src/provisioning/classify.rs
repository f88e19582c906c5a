//! Maps raw ad platform errors onto a fixed set of user-facing reasons.
//!
//! The table is plain data and is checked in order; the first matching rule
//! wins. Classification only affects messaging, never whether funds are
//! refunded.

use serde::Serialize;

use crate::platform::UpstreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidPost,
    BudgetOrSchedule,
    Bidding,
    PaymentMethod,
    PagePermission,
}

impl FailureKind {
    pub fn explanation(self) -> &'static str {
        match self {
            FailureKind::InvalidPost => {
                "The selected post could not be promoted. It may have been deleted, \
                 be private, or not belong to the selected page."
            }
            FailureKind::BudgetOrSchedule => {
                "The ad platform rejected the budget or schedule. Try a larger \
                 budget or a different duration."
            }
            FailureKind::Bidding => {
                "The ad platform rejected the bidding configuration for this promotion."
            }
            FailureKind::PaymentMethod => {
                "The advertising account has no valid payment method. Please contact support."
            }
            FailureKind::PagePermission => {
                "The platform is not allowed to advertise on behalf of this page. \
                 Reconnect the page and grant advertising permissions."
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Code(i64),
    Subcode(i64),
    /// Case-insensitive substring of the message or user-facing text.
    Text(&'static str),
}

impl Pattern {
    fn matches(self, error: &UpstreamError, text: &str) -> bool {
        match self {
            Pattern::Code(code) => error.code == Some(code),
            Pattern::Subcode(subcode) => error.subcode == Some(subcode),
            Pattern::Text(needle) => text.contains(needle),
        }
    }
}

const CLASSIFICATION_TABLE: &[(Pattern, FailureKind)] = &[
    (Pattern::Text("payment method"), FailureKind::PaymentMethod),
    (Pattern::Text("funding source"), FailureKind::PaymentMethod),
    (Pattern::Text("no payment"), FailureKind::PaymentMethod),
    (Pattern::Code(10), FailureKind::PagePermission),
    (Pattern::Code(200), FailureKind::PagePermission),
    (Pattern::Text("permission"), FailureKind::PagePermission),
    (Pattern::Text("not authorized"), FailureKind::PagePermission),
    (Pattern::Text("page access"), FailureKind::PagePermission),
    (Pattern::Text("bid amount"), FailureKind::Bidding),
    (Pattern::Text("bid_amount"), FailureKind::Bidding),
    (Pattern::Text("bid strategy"), FailureKind::Bidding),
    (Pattern::Text("bid_strategy"), FailureKind::Bidding),
    (Pattern::Text("bidding"), FailureKind::Bidding),
    (Pattern::Subcode(1487007), FailureKind::BudgetOrSchedule),
    (Pattern::Text("budget"), FailureKind::BudgetOrSchedule),
    (Pattern::Text("schedule"), FailureKind::BudgetOrSchedule),
    (Pattern::Text("end time"), FailureKind::BudgetOrSchedule),
    (Pattern::Text("end_time"), FailureKind::BudgetOrSchedule),
    (Pattern::Text("object_story_id"), FailureKind::InvalidPost),
    (Pattern::Text("invalid post"), FailureKind::InvalidPost),
    (Pattern::Text("post id"), FailureKind::InvalidPost),
    (Pattern::Text("does not exist"), FailureKind::InvalidPost),
];

/// A platform failure after classification.
#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    Known {
        kind: FailureKind,
        error: UpstreamError,
    },
    Unknown {
        error: UpstreamError,
    },
}

impl UpstreamFailure {
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            UpstreamFailure::Known { kind, .. } => Some(*kind),
            UpstreamFailure::Unknown { .. } => None,
        }
    }

    pub fn error(&self) -> &UpstreamError {
        match self {
            UpstreamFailure::Known { error, .. } | UpstreamFailure::Unknown { error } => error,
        }
    }

    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self.kind() {
            Some(FailureKind::InvalidPost) => "invalid_post",
            Some(FailureKind::BudgetOrSchedule) => "budget_or_schedule",
            Some(FailureKind::Bidding) => "bidding",
            Some(FailureKind::PaymentMethod) => "payment_method",
            Some(FailureKind::PagePermission) => "page_permission",
            None => "unknown",
        }
    }

    pub fn explanation(&self) -> String {
        match self {
            UpstreamFailure::Known { kind, .. } => kind.explanation().to_string(),
            UpstreamFailure::Unknown { error } => {
                format!("The ad platform rejected the request: {}", error.message)
            }
        }
    }

    /// Raw upstream payload. Always present for unclassified failures.
    pub fn detail(&self) -> Option<&str> {
        match self {
            UpstreamFailure::Known { .. } => None,
            UpstreamFailure::Unknown { error } => Some(error.raw.as_str()),
        }
    }
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.reason(), self.error().message)
    }
}

pub fn classify(error: UpstreamError) -> UpstreamFailure {
    let mut text = error.message.to_lowercase();
    if let Some(user_message) = &error.user_message {
        text.push(' ');
        text.push_str(&user_message.to_lowercase());
    }

    let kind = CLASSIFICATION_TABLE
        .iter()
        .find(|(pattern, _)| pattern.matches(&error, &text))
        .map(|(_, kind)| *kind);

    match kind {
        Some(kind) => UpstreamFailure::Known { kind, error },
        None => UpstreamFailure::Unknown { error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(message: &str) -> UpstreamError {
        UpstreamError::new(message)
    }

    #[test]
    fn classifies_by_message_text() {
        let cases = [
            ("Invalid parameter: object_story_id is invalid", FailureKind::InvalidPost),
            ("Object with ID '123' does not exist", FailureKind::InvalidPost),
            ("Your daily budget is too low", FailureKind::BudgetOrSchedule),
            ("The Bid Amount is required for this bid strategy", FailureKind::Bidding),
            ("No payment method on this ad account", FailureKind::PaymentMethod),
            ("User does not have permission to advertise for this page", FailureKind::PagePermission),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(error(message)).kind(), Some(expected), "{message}");
        }
    }

    #[test]
    fn codes_and_subcodes_take_part_in_matching() {
        let mut permission = error("(#200) Requires pages_manage_ads");
        permission.code = Some(200);
        assert_eq!(classify(permission).kind(), Some(FailureKind::PagePermission));

        let mut schedule = error("Invalid parameter");
        schedule.code = Some(100);
        schedule.subcode = Some(1487007);
        assert_eq!(classify(schedule).kind(), Some(FailureKind::BudgetOrSchedule));
    }

    #[test]
    fn user_message_is_considered() {
        let mut err = error("Invalid parameter");
        err.user_message = Some("Ad account has no funding source".into());
        assert_eq!(classify(err).kind(), Some(FailureKind::PaymentMethod));
    }

    #[test]
    fn forbidden_is_not_mistaken_for_bidding() {
        let failure = classify(error("Forbidden"));
        assert!(failure.kind().is_none());
    }

    #[test]
    fn unknown_failures_keep_raw_payload() {
        let mut err = error("Something odd happened");
        err.raw = r#"{"error":{"message":"Something odd happened","code":1}}"#.into();
        let failure = classify(err);

        assert_eq!(failure.reason(), "unknown");
        assert!(failure.explanation().contains("Something odd happened"));
        assert_eq!(failure.detail(), Some(r#"{"error":{"message":"Something odd happened","code":1}}"#));
    }
}
