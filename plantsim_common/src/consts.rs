//! System-wide constants for the plantsim workspace.
//!
//! Single source of truth for numeric limits and defaults. Imported by
//! all crates — no duplication permitted.

/// Default bound on the central audit log (State Store).
pub const DEFAULT_AUDIT_LOG_CAPACITY: usize = 10_000;

/// Default bound on a per-logger in-memory audit ring.
pub const DEFAULT_LOGGER_RING_CAPACITY: usize = 2_000;

/// Default bound on the connection registry's closed-session history.
pub const DEFAULT_CONNECTION_HISTORY_CAPACITY: usize = 500;

/// Default bound on the firewall's blocked-connection history.
pub const DEFAULT_FIREWALL_HISTORY_CAPACITY: usize = 1_000;

/// Maximum permitted simulation speed multiplier.
pub const MAX_SPEED_MULTIPLIER: f64 = 1000.0;

/// Default simulation clock advance-loop tick.
pub const CLOCK_TICK_MS: u64 = 10;

/// Minimum sleep used by `waitFor` to avoid a busy loop.
pub const WAIT_FOR_MIN_SLEEP_MS: u64 = 1;

/// Default outer physics-tick interval.
pub const DEFAULT_UPDATE_INTERVAL_S: f64 = 0.1;

/// Default safety controller scan interval.
pub const DEFAULT_SAFETY_SCAN_INTERVAL_S: f64 = 0.025;

/// Default process-PLC scan interval.
pub const DEFAULT_PLC_SCAN_INTERVAL_S: f64 = 0.1;

/// Default HVAC / RTU scan interval.
pub const DEFAULT_SLOW_SCAN_INTERVAL_S: f64 = 1.0;

/// Firewall block-rate alarm threshold (connections/minute).
pub const FIREWALL_BLOCK_RATE_ALARM: f64 = 50.0;

/// Firewall block-rate alarm clear threshold (hysteresis).
pub const FIREWALL_BLOCK_RATE_CLEAR: f64 = 30.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(DEFAULT_AUDIT_LOG_CAPACITY > 0);
        assert!(DEFAULT_LOGGER_RING_CAPACITY > 0);
        assert!(MAX_SPEED_MULTIPLIER > 0.0);
        assert!(FIREWALL_BLOCK_RATE_CLEAR < FIREWALL_BLOCK_RATE_ALARM);
        assert!(DEFAULT_SAFETY_SCAN_INTERVAL_S < DEFAULT_PLC_SCAN_INTERVAL_S);
        assert!(DEFAULT_PLC_SCAN_INTERVAL_S <= DEFAULT_SLOW_SCAN_INTERVAL_S);
    }
}
