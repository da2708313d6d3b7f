//! Full connection lifecycle across the firewall boundary: a blocked
//! source never reaches the connection registry, an allowed source is
//! tracked while active, and its eventual forced close leaves a
//! forensic record distinct from a normal disconnect.

use plantsim_core::connection::ConnectionRegistry;
use plantsim_core::firewall::{ConnectionRequest, Firewall, FirewallRule, RuleAction, RuleProtocol};
use plantsim_store::clock::{ClockMode, SimulationClock};
use plantsim_store::logger::LoggerRegistry;
use plantsim_store::store::StateStore;

#[tokio::test]
async fn blocked_source_never_gets_a_session_allowed_source_leaves_forensic_history() {
    let store = StateStore::with_default_capacity();
    let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
    let fw_logger = LoggerRegistry::new(clock.clone(), store.clone()).get_logger("firewall", Some("fw_1"));
    let conn_logger = LoggerRegistry::new(clock, store).get_logger("connections", None);

    let mut firewall = Firewall::new("fw_1", fw_logger);
    firewall.add_rule(
        FirewallRule::new("allow-engineering-modbus", "engineering to control modbus", 10, RuleAction::Allow)
            .from_zone("engineering")
            .to_zone("control")
            .for_protocol(RuleProtocol::ModbusTcp),
    );
    let registry = ConnectionRegistry::new(conn_logger);

    let unauthorised = ConnectionRequest {
        source_ip: "203.0.113.9".into(),
        source_zone: "enterprise".into(),
        dest_ip: "10.1.0.5".into(),
        dest_zone: "control".into(),
        dest_port: 502,
        protocol: RuleProtocol::ModbusTcp,
    };
    let (allowed, _) = firewall.check_connection(&unauthorised, 0.0);
    assert!(!allowed);
    // Only open a session for connections the firewall actually allows.
    assert!(registry.get_active().is_empty());

    let authorised = ConnectionRequest {
        source_ip: "10.10.0.5".into(),
        source_zone: "engineering".into(),
        dest_ip: "10.1.0.5".into(),
        dest_zone: "control".into(),
        dest_port: 502,
        protocol: RuleProtocol::ModbusTcp,
    };
    let (allowed, _) = firewall.check_connection(&authorised, 1.0);
    assert!(allowed);
    let session_id = registry.connect(authorised.source_ip.as_str(), "modbus_tcp", "turbine_1_plc", 1.0);
    assert_eq!(registry.get_active().len(), 1);

    assert!(registry.kill_connection(&session_id, 42.0));
    assert!(registry.get_active().is_empty());

    let history = registry.get_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].session_id, session_id);
    assert_eq!(history[0].source_ip, authorised.source_ip);
    assert_eq!(history[0].connected_at, 1.0);
    assert_eq!(history[0].closed_at, 42.0);
    assert_eq!(history[0].reason, "killed by operator");

    let status = firewall.status();
    assert_eq!(status["total_connections_allowed"], 1);
    assert_eq!(status["total_connections_blocked"], 1);
}
