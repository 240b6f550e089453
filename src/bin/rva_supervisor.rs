//! rva_supervisor - line-delimited-JSON job-control daemon for
//! reversible-video-anonymization jobs.
//!
//! Reads one [`Command`] per line from stdin and dispatches it to a
//! [`Supervisor`], which runs at most one anonymization job at a time and
//! reports its lifecycle as JSON progress events on stdout.

use std::io::BufRead;

use rva_kernel::config::AnonymizeConfig;
use rva_kernel::supervisor::{Command, Supervisor};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AnonymizeConfig::load()?;
    let supervisor = Supervisor::new(config);

    log::info!("rva_supervisor ready, reading commands from stdin");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let command: Command = match serde_json::from_str(trimmed) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("ignoring malformed command: {e}");
                continue;
            }
        };
        if supervisor.handle(command) {
            break;
        }
    }

    supervisor.shutdown();
    log::info!("rva_supervisor exiting");
    Ok(())
}
