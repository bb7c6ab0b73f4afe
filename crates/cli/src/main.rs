//! Voice Console
//!
//! Interactive operator console for the live-call session controller. It
//! drives a `VoiceSessionController` against the simulated telephony backend:
//! - `init` registers the device, `call <number>` dials out
//! - `ring [from]`, `answer` and `remote-hangup` play the far end
//! - the microphone level meter runs while a call is live

mod console;
mod logging;
mod settings;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::Level;

use crate::console::Console;
use crate::logging::{LoggingConfig, parse_log_level, setup_logging};
use crate::settings::Overrides;

#[derive(Parser, Debug)]
#[command(author, version, about = "Call center operator voice console", long_about = None)]
struct Args {
    /// Settings file (default: <config dir>/callcenter/voice.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Telephony credential token
    #[arg(long, env = "VOICE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Show failed reject/disconnect/mute commands as warnings
    #[arg(long)]
    warn_on_command_failure: bool,

    /// Let the simulated far end react to call commands
    #[arg(long)]
    auto_signaling: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = parse_log_level(&args.log_level)?;
    setup_logging(
        &LoggingConfig::new(level, "voice-console")
            .with_json(args.json_logs)
            .with_file_info(level >= Level::DEBUG),
    )?;

    let settings = settings::load(args.config.as_deref())?.with_overrides(Overrides {
        token: args.token,
        warn_on_command_failure: args.warn_on_command_failure,
        auto_signaling: args.auto_signaling,
    });

    Console::new(settings)?.run().await
}
