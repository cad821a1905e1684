//! Process-wide logging sink (§9 Design Notes): the one piece of global
//! state left in the crate, bounded to an explicit initialise/teardown
//! pair so a consuming binary controls its own process entry and exit
//! rather than this crate reaching for a lazily-initialised global.
//!
//! Every agent child (`shell::run_agent_process`) and the supervisor's
//! own `main` call [`init`] once, before doing anything else, and hold
//! the returned [`Guard`] for the lifetime of the process.

use tracing_subscriber::EnvFilter;

/// Held for the lifetime of the process; dropping it is the "teardown"
/// half of the pair. There is currently nothing buffered that needs
/// flushing, but the guard keeps the init/teardown seam explicit so a
/// future non-blocking writer can slot in here without changing call
/// sites.
pub struct Guard(());

impl Drop for Guard {
    fn drop(&mut self) {
        tracing::trace!("logging teardown");
    }
}

/// Installs the global `tracing` subscriber: compact text output,
/// filterable with `RUST_LOG` (falling back to `info` for this crate
/// and `warn` for everything else so a dependency's own chatter doesn't
/// drown out `gatorcap`'s structured fields).
///
/// Safe to call from both the supervisor and an agent child: each is a
/// separate process, so there is no risk of a second global subscriber
/// install within the same process. Idempotent within a process (a
/// second call is a no-op) since `#[cfg(test)]` harnesses may spin up
/// more than one [`crate::agent::AgentEnvironment`] per test binary.
pub fn init() -> Guard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,gatorcap=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
    Guard(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let _g1 = init();
        let _g2 = init();
    }
}
