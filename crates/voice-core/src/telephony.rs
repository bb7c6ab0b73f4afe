//! Telephony capability consumed by the controller
//!
//! The SDK that actually speaks to the telephony provider is opaque to this
//! crate. It is reached through three traits:
//!
//! - [`TelephonyConnector`] builds a client for a credential token and hands
//!   it the sender half of the event stream
//! - [`TelephonyClient`] is one registered endpoint (register, connect,
//!   update_token, destroy)
//! - [`CallHandle`] is one call instance with fire-and-forget commands
//!
//! ```text
//! ┌──────────────────────┐  commands   ┌──────────────────────┐
//! │ VoiceSessionController│───────────▶│  TelephonyClient     │
//! │                      │             │  CallHandle          │
//! │   pump ◀── mpsc ─────┼─────────────│  (emit events)       │
//! └──────────────────────┘   events    └──────────────────────┘
//! ```
//!
//! Implementations emit [`TelephonyEvent`]s on the sender they were built
//! with; they never mutate controller state directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::VoiceResult;
use crate::events::TelephonyEventSender;
use crate::types::{CallDirection, CallId};

/// Parameter key carrying the caller identifier
pub const FROM_PARAM: &str = "From";

/// Parameter key carrying the dialed destination
pub const TO_PARAM: &str = "To";

/// Parameters of an outbound connect command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Destination number or client identity
    pub to: String,
}

impl ConnectParams {
    pub fn new(to: impl Into<String>) -> Self {
        Self { to: to.into() }
    }
}

/// Signaling parameters attached to a call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallParameters {
    /// Provider parameters (`From`, `To`, `CallSid`, ...)
    pub params: HashMap<String, String>,
    /// Application-defined custom parameters
    pub custom: HashMap<String, String>,
}

impl CallParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Add a custom parameter
    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Caller identifier: the `From` parameter, then the `From` custom
    /// parameter, `None` when neither is present
    pub fn caller(&self) -> Option<&str> {
        self.params
            .get(FROM_PARAM)
            .or_else(|| self.custom.get(FROM_PARAM))
            .map(String::as_str)
    }
}

/// One call instance (inbound or outbound)
///
/// Commands are synchronous and fire-and-forget: they hand the request to the
/// SDK and return. Their effects arrive later as [`CallEvent`](crate::events::CallEvent)s.
/// An `Err` means the SDK refused the command outright.
pub trait CallHandle: Send + Sync + fmt::Debug {
    /// Identifier used to route this call's events
    fn id(&self) -> CallId;

    fn direction(&self) -> CallDirection;

    /// Signaling parameters of the call
    fn parameters(&self) -> CallParameters;

    fn accept(&self) -> VoiceResult<()>;

    fn reject(&self) -> VoiceResult<()>;

    fn disconnect(&self) -> VoiceResult<()>;

    fn mute(&self, muted: bool) -> VoiceResult<()>;
}

/// A telephony endpoint built for one credential token
#[async_trait]
pub trait TelephonyClient: Send + Sync + fmt::Debug {
    /// Swap the credential on the existing endpoint
    fn update_token(&self, token: &str) -> VoiceResult<()>;

    /// Register the endpoint; resolves once the provider accepts it
    async fn register(&self) -> VoiceResult<()>;

    /// Place an outbound call; resolves with the call once the command is accepted
    async fn connect(&self, params: ConnectParams) -> VoiceResult<Arc<dyn CallHandle>>;

    /// Tear the endpoint down. Must be idempotent.
    fn destroy(&self);
}

/// Factory for telephony clients
pub trait TelephonyConnector: Send + Sync {
    /// Build a client for `token` that reports on `events`
    fn create_client(
        &self,
        token: &str,
        events: TelephonyEventSender,
    ) -> VoiceResult<Arc<dyn TelephonyClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_prefers_provider_param() {
        let params = CallParameters::new()
            .with_param(FROM_PARAM, "+998901112233")
            .with_custom(FROM_PARAM, "agent-7");
        assert_eq!(params.caller(), Some("+998901112233"));
    }

    #[test]
    fn test_caller_falls_back_to_custom_param() {
        let params = CallParameters::new().with_custom(FROM_PARAM, "client:alice");
        assert_eq!(params.caller(), Some("client:alice"));
        assert_eq!(CallParameters::new().caller(), None);
    }
}
