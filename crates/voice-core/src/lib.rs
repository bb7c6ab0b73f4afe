//! # Call Center Voice Core
//!
//! Live voice-call session control for the operator console. One
//! [`VoiceSessionController`] owns a telephony endpoint and at most one
//! active and one pending incoming call, turns operator commands and
//! telephony events into a consistent [`VoiceSnapshot`], and never lets a
//! failure escape as anything other than observable state.
//!
//! ## Layout
//!
//! - [`controller`]: the command surface and the event pump
//! - [`state`]: the pure reducer every transition goes through
//! - [`telephony`]: the capability traits a telephony SDK is reached through
//! - [`events`]: inbound telephony events and outbound notifications
//! - [`audio`]: microphone level metering while a call is live
//! - [`simulated`]: in-process telephony and microphone backends
//!
//! ## Quick Start
//!
//! ```rust
//! use callcenter_voice_core::{VoiceConfig, VoiceSessionController, VoiceStatus};
//! use callcenter_voice_core::simulated::SimulatedConnector;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = Arc::new(SimulatedConnector::new());
//! let controller = VoiceSessionController::new(
//!     VoiceConfig::new().with_token("token-123"),
//!     connector.clone(),
//! )?;
//!
//! controller.initialize().await;
//! let snapshot = controller.start_call("+998901112233").await;
//! assert_eq!(snapshot.status, VoiceStatus::Calling);
//! assert!(snapshot.has_active_call);
//!
//! controller.hang_up();
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod recovery;
pub mod simulated;
pub mod state;
pub mod telephony;
pub mod types;

// Re-export main types
pub use config::{CommandFailurePolicy, MeterConfig, VoiceConfig};
pub use controller::VoiceSessionController;
pub use error::{TOKEN_MISSING_MESSAGE, VoiceError, VoiceResult};
pub use events::{CallEvent, DeviceEvent, EventStream, TelephonyEvent, VoiceEvent};
pub use telephony::{CallHandle, CallParameters, ConnectParams, TelephonyClient, TelephonyConnector};
pub use types::{CallCommand, CallDirection, CallId, VoiceSnapshot, VoiceStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
