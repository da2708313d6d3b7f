//! Perimeter firewall wiring matching the supervisor's default
//! zone policy: engineering Modbus traffic into the control zone is
//! allowed, enterprise traffic into the control zone is denied, and a
//! burst of denied connections from an unauthorised source raises the
//! block-rate alarm while leaving the legitimate traffic unaffected.

use plantsim_core::controller::ScanController;
use plantsim_core::firewall::{ConnectionRequest, Firewall, FirewallRule, RuleAction, RuleProtocol};
use plantsim_store::clock::{ClockMode, SimulationClock};
use plantsim_store::logger::LoggerRegistry;
use plantsim_store::store::StateStore;

fn make_firewall() -> Firewall {
    let store = StateStore::with_default_capacity();
    let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
    let logger = LoggerRegistry::new(clock, store).get_logger("firewall", Some("fw_1"));
    let mut firewall = Firewall::new("fw_1", logger);
    firewall.add_rule(
        FirewallRule::new("allow-engineering-modbus", "engineering to control modbus", 10, RuleAction::Allow)
            .from_zone("engineering")
            .to_zone("control")
            .for_protocol(RuleProtocol::ModbusTcp),
    );
    firewall.add_rule(
        FirewallRule::new("deny-enterprise-to-control", "enterprise cannot reach control", 20, RuleAction::Deny)
            .from_zone("enterprise")
            .to_zone("control"),
    );
    firewall
}

#[tokio::test]
async fn authorised_source_passes_unauthorised_source_is_blocked_and_raises_alarm() {
    let mut firewall = make_firewall();

    let engineering_request = ConnectionRequest {
        source_ip: "10.10.0.5".into(),
        source_zone: "engineering".into(),
        dest_ip: "10.1.0.5".into(),
        dest_zone: "control".into(),
        dest_port: 502,
        protocol: RuleProtocol::ModbusTcp,
    };
    let (allowed, _) = firewall.check_connection(&engineering_request, 0.0);
    assert!(allowed, "engineering Modbus traffic into control must be allowed");

    let enterprise_request = ConnectionRequest {
        source_ip: "203.0.113.7".into(),
        source_zone: "enterprise".into(),
        dest_ip: "10.1.0.5".into(),
        dest_zone: "control".into(),
        dest_port: 502,
        protocol: RuleProtocol::ModbusTcp,
    };

    for i in 0..60 {
        let (allowed, reason) = firewall.check_connection(&enterprise_request, 10.0 + i as f64);
        assert!(!allowed, "enterprise traffic into control must be blocked");
        assert!(reason.contains("deny-enterprise-to-control"));
    }

    firewall.run_diagnostics().await.unwrap();
    let status = firewall.status();
    assert_eq!(status["total_connections_allowed"], 1);
    assert_eq!(status["total_connections_blocked"], 60);
    assert_eq!(status["block_rate_alarm_active"], true);
}
