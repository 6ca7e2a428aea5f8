//! Route and consumer configuration
//!
//! Options are plain structs with builder methods and presets. They can also be
//! deserialized (for file-based configuration) or read from the environment:
//!
//! - `CARDKIT_ERROR_POLICY`: policy for both failure kinds (`abort`, `skip`, `report`)
//! - `CARDKIT_VALIDATION_POLICY`: overrides the policy for validation failures
//! - `CARDKIT_HANDLER_POLICY`: overrides the policy for handler failures
//! - `CARDKIT_MASK_ERRORS`: `true`/`false`, hide handler messages from clients

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encode::SseOptions;
use crate::error::{CardError, Result};
use crate::policy::{ErrorPolicies, ErrorPolicy, Masking};

/// Options shared by the HTTP, streaming and WebSocket routes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteOptions {
    /// What happens to failing items.
    pub policies: ErrorPolicies,
    /// How handler messages are exposed.
    #[serde(flatten)]
    pub masking: Masking,
    /// SSE framing (streaming routes in SSE format only).
    pub sse: SseOptions,
    /// WebSocket routes: when the upgrade query carries no parameters, wait
    /// for one client message and use it as the parameters.
    pub wait_for_initial_message: bool,
}

impl RouteOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options suitable for development (errors not masked).
    pub fn development() -> Self {
        Self {
            masking: Masking {
                mask_errors: false,
                masked_error_message: None,
            },
            ..Default::default()
        }
    }

    /// Options suitable for production (handler errors masked).
    pub fn production() -> Self {
        Self {
            masking: Masking {
                mask_errors: true,
                masked_error_message: None,
            },
            ..Default::default()
        }
    }

    /// One policy for both failure kinds.
    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policies = ErrorPolicies::shared(policy);
        self
    }

    /// Both policies at once.
    pub fn with_policies(mut self, policies: ErrorPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Policy for validation failures only.
    pub fn with_validation_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policies.validation = policy;
        self
    }

    /// Policy for handler failures only.
    pub fn with_handler_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policies.handler = policy;
        self
    }

    /// Hide handler error messages from clients.
    pub fn with_masked_errors(mut self, mask: bool) -> Self {
        self.masking.mask_errors = mask;
        self
    }

    /// Replacement for masked handler messages.
    pub fn with_masked_error_message(mut self, message: impl Into<String>) -> Self {
        self.masking.masked_error_message = Some(message.into());
        self
    }

    /// SSE framing options.
    pub fn with_sse(mut self, sse: SseOptions) -> Self {
        self.sse = sse;
        self
    }

    /// Wait for an initial client message on WebSocket routes.
    pub fn with_initial_message(mut self, wait: bool) -> Self {
        self.wait_for_initial_message = wait;
        self
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(policy) = lookup("CARDKIT_ERROR_POLICY") {
            options.policies = ErrorPolicies::shared(policy.parse()?);
        }
        if let Some(policy) = lookup("CARDKIT_VALIDATION_POLICY") {
            options.policies.validation = policy.parse()?;
        }
        if let Some(policy) = lookup("CARDKIT_HANDLER_POLICY") {
            options.policies.handler = policy.parse()?;
        }
        if let Some(mask) = lookup("CARDKIT_MASK_ERRORS") {
            options.masking.mask_errors = parse_bool("CARDKIT_MASK_ERRORS", &mask)?;
        }
        Ok(options)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(CardError::Config(format!(
            "Invalid boolean for {key}: {other}"
        ))),
    }
}

/// Options for subscription-style WebSocket consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Policy for outgoing messages that fail validation.
    pub policy: ErrorPolicy,
    /// Seconds between server pings; `0` disables the heartbeat.
    pub heartbeat_interval_secs: u64,
    /// Acknowledgement policy for subscriptions that do not name one.
    pub ack_policy: String,
    /// How handler messages are exposed.
    #[serde(flatten)]
    pub masking: Masking,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            policy: ErrorPolicy::Skip,
            heartbeat_interval_secs: 30,
            ack_policy: "auto".to_string(),
            masking: Masking::default(),
        }
    }
}

impl ConsumerOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validation failure policy.
    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Heartbeat period; zero disables it.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_secs = interval.as_secs();
        self
    }

    /// Default acknowledgement policy.
    pub fn with_ack_policy(mut self, ack_policy: impl Into<String>) -> Self {
        self.ack_policy = ack_policy.into();
        self
    }

    /// Hide handler error messages from clients.
    pub fn with_masked_errors(mut self, mask: bool) -> Self {
        self.masking.mask_errors = mask;
        self
    }

    /// The heartbeat period, if enabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}
