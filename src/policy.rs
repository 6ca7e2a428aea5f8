//! Error policy
//!
//! A route decides at registration time what happens to an item whose handler
//! or validation step fails. The policy is a closed enumeration; the only place
//! that matches on it while streaming is [`crate::pipeline::validate_stream`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CardError, FailureKind};

/// What to do with a failing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// The first failure terminates the response.
    #[default]
    #[serde(alias = "fail")]
    Abort,
    /// The failing item is omitted and processing continues.
    Skip,
    /// The failing item is replaced by an inline error payload.
    #[serde(alias = "log")]
    Report,
}

impl ErrorPolicy {
    /// Canonical name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorPolicy {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "fail" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            "report" | "log" => Ok(Self::Report),
            other => Err(CardError::Config(format!(
                "Invalid error policy: {other}. Valid options: abort, skip, report"
            ))),
        }
    }
}

/// Policies for the two failure kinds.
///
/// Both default to the same policy; they only diverge when configured apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPolicies {
    /// Applied when an item fails schema validation.
    pub validation: ErrorPolicy,
    /// Applied when the handler fails.
    pub handler: ErrorPolicy,
}

impl ErrorPolicies {
    /// One policy for both failure kinds.
    pub const fn shared(policy: ErrorPolicy) -> Self {
        Self {
            validation: policy,
            handler: policy,
        }
    }

    /// Independent policies.
    pub const fn split(validation: ErrorPolicy, handler: ErrorPolicy) -> Self {
        Self {
            validation,
            handler,
        }
    }

    /// Policy governing a failure kind.
    pub const fn for_kind(&self, kind: FailureKind) -> ErrorPolicy {
        match kind {
            FailureKind::Validation => self.validation,
            FailureKind::Handler => self.handler,
        }
    }

    /// Policy governing an error. Errors outside the two policy kinds always abort.
    pub fn for_error(&self, error: &CardError) -> ErrorPolicy {
        error
            .failure_kind()
            .map_or(ErrorPolicy::Abort, |kind| self.for_kind(kind))
    }
}

impl From<ErrorPolicy> for ErrorPolicies {
    fn from(policy: ErrorPolicy) -> Self {
        Self::shared(policy)
    }
}

/// Structured error payload written in place of a failing item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Always `"error"`, so clients can tell payloads from records.
    pub action: String,
    /// Which side failed.
    pub kind: FailureKind,
    /// Human readable message (possibly masked).
    pub message: String,
    /// Field diagnostics for validation failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<crate::error::FieldError>,
    /// Position of the failing item in the handler's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// When the failure was observed (RFC 3339).
    pub timestamp: String,
}

/// How handler messages are exposed in error payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Masking {
    /// Replace handler error messages with a generic one.
    pub mask_errors: bool,
    /// Replacement message; `"internal error"` when unset.
    pub masked_error_message: Option<String>,
}

impl Masking {
    fn handler_message(&self, message: &str) -> String {
        if self.mask_errors {
            self.masked_error_message
                .clone()
                .unwrap_or_else(|| "internal error".to_string())
        } else {
            message.to_string()
        }
    }
}

impl ErrorPayload {
    /// Build a payload for an error observed at `index`.
    pub fn from_error(error: &CardError, index: Option<usize>, masking: &Masking) -> Self {
        let (kind, message, fields) = match error {
            CardError::Validation(v) => (
                FailureKind::Validation,
                v.to_string(),
                v.fields.clone(),
            ),
            CardError::Handler(h) => (
                FailureKind::Handler,
                masking.handler_message(h.message()),
                Vec::new(),
            ),
            other => (
                FailureKind::Handler,
                masking.handler_message(&other.user_message()),
                Vec::new(),
            ),
        };
        Self {
            action: "error".to_string(),
            kind,
            message,
            fields,
            index,
            timestamp: crate::utils::now_rfc3339(),
        }
    }
}
