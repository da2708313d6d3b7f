//! Firewall boundary device: priority-ordered rule
//! evaluation over simulated connection attempts, a bounded
//! blocked-connection history, and a rolling block-rate alarm with
//! hysteresis.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use plantsim_common::consts::{DEFAULT_FIREWALL_HISTORY_CAPACITY, FIREWALL_BLOCK_RATE_ALARM, FIREWALL_BLOCK_RATE_CLEAR};
use plantsim_common::error::SimResult;
use plantsim_common::types::{AlarmPriority, AlarmState, Severity};
use plantsim_store::logger::EventLogger;
use serde::Serialize;

use crate::controller::{ScanController, ScanStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleAction {
    Allow,
    Deny,
    Drop,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleProtocol {
    Any,
    ModbusTcp,
    Dnp3,
    S7,
    OpcUa,
    EthernetIp,
    Iec104,
    Goose,
    Http,
    Https,
    Ssh,
    Telnet,
    Ftp,
    Smb,
}

/// `None` on a zone/network/ip/port field means "any".
#[derive(Debug, Clone)]
pub struct FirewallRule {
    pub rule_id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    pub action: RuleAction,
    pub source_zone: Option<String>,
    pub dest_zone: Option<String>,
    pub dest_port: Option<u16>,
    pub protocol: RuleProtocol,
    pub description: String,
    pub hit_count: u64,
    pub last_hit_time: Option<f64>,
    pub log_matches: bool,
}

impl FirewallRule {
    pub fn new(rule_id: impl Into<String>, name: impl Into<String>, priority: i32, action: RuleAction) -> Self {
        Self {
            rule_id: rule_id.into(),
            name: name.into(),
            enabled: true,
            priority,
            action,
            source_zone: None,
            dest_zone: None,
            dest_port: None,
            protocol: RuleProtocol::Any,
            description: String::new(),
            hit_count: 0,
            last_hit_time: None,
            log_matches: true,
        }
    }

    pub fn from_zone(mut self, zone: impl Into<String>) -> Self {
        self.source_zone = Some(zone.into());
        self
    }

    pub fn to_zone(mut self, zone: impl Into<String>) -> Self {
        self.dest_zone = Some(zone.into());
        self
    }

    pub fn on_port(mut self, port: u16) -> Self {
        self.dest_port = Some(port);
        self
    }

    pub fn for_protocol(mut self, protocol: RuleProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    fn matches(&self, request: &ConnectionRequest) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(zone) = &self.source_zone {
            if zone != &request.source_zone {
                return false;
            }
        }
        if let Some(zone) = &self.dest_zone {
            if zone != &request.dest_zone {
                return false;
            }
        }
        if let Some(port) = self.dest_port {
            if port != request.dest_port {
                return false;
            }
        }
        if self.protocol != RuleProtocol::Any && self.protocol != request.protocol {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub source_ip: String,
    pub source_zone: String,
    pub dest_ip: String,
    pub dest_zone: String,
    pub dest_port: u16,
    pub protocol: RuleProtocol,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedConnection {
    pub sim_time: f64,
    pub source_ip: String,
    pub dest_ip: String,
    pub dest_port: u16,
    pub rule_id: Option<String>,
    pub reason: String,
}

pub struct Firewall {
    name: String,
    logger: Arc<EventLogger>,
    stats: Arc<ScanStats>,
    rules: Vec<FirewallRule>,
    default_action: RuleAction,
    blocked_connections: VecDeque<BlockedConnection>,
    block_history_limit: usize,
    total_connections_allowed: u64,
    total_connections_blocked: u64,
    recent_block_times: VecDeque<f64>,
    block_rate_alarm_active: bool,
}

impl Firewall {
    pub fn new(name: impl Into<String>, logger: Arc<EventLogger>) -> Self {
        Self {
            name: name.into(),
            logger,
            stats: ScanStats::new(),
            rules: Vec::new(),
            default_action: RuleAction::Deny,
            blocked_connections: VecDeque::new(),
            block_history_limit: DEFAULT_FIREWALL_HISTORY_CAPACITY,
            total_connections_allowed: 0,
            total_connections_blocked: 0,
            recent_block_times: VecDeque::new(),
            block_rate_alarm_active: false,
        }
    }

    pub fn add_rule(&mut self, rule: FirewallRule) {
        self.logger.log_audit(format!("firewall rule {} added", rule.rule_id), Some("operator".into()), "add_rule", "ok");
        self.rules.push(rule);
        self.sort_rules();
    }

    pub fn remove_rule(&mut self, rule_id: &str) {
        self.rules.retain(|r| r.rule_id != rule_id);
        self.logger.log_audit(format!("firewall rule {rule_id} removed"), Some("operator".into()), "remove_rule", "ok");
    }

    pub fn enable_rule(&mut self, rule_id: &str, enabled: bool) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.rule_id == rule_id) {
            rule.enabled = enabled;
            self.logger.log_audit(
                format!("firewall rule {rule_id} {}", if enabled { "enabled" } else { "disabled" }),
                Some("operator".into()),
                "enable_rule",
                "ok",
            );
        }
    }

    fn sort_rules(&mut self) {
        self.rules.sort_by_key(|r| r.priority);
    }

    /// First matching enabled rule wins; falls through to
    /// `default_action` if nothing matches.
    pub fn check_connection(&mut self, request: &ConnectionRequest, sim_time: f64) -> (bool, String) {
        for i in 0..self.rules.len() {
            if self.rules[i].matches(request) {
                let rule_id = self.rules[i].rule_id.clone();
                let action = self.rules[i].action;
                let log_matches = self.rules[i].log_matches;
                self.rules[i].hit_count += 1;
                self.rules[i].last_hit_time = Some(sim_time);
                return self.resolve(action, Some(rule_id), request, sim_time, log_matches);
            }
        }
        self.resolve(self.default_action, None, request, sim_time, true)
    }

    fn resolve(
        &mut self,
        action: RuleAction,
        rule_id: Option<String>,
        request: &ConnectionRequest,
        sim_time: f64,
        log_matches: bool,
    ) -> (bool, String) {
        match action {
            RuleAction::Allow => {
                self.total_connections_allowed += 1;
                (true, "allowed".to_string())
            }
            RuleAction::Deny | RuleAction::Drop | RuleAction::Reject => {
                self.total_connections_blocked += 1;
                let reason = format!("{action:?} by rule {}", rule_id.as_deref().unwrap_or("default"));
                self.blocked_connections.push_back(BlockedConnection {
                    sim_time,
                    source_ip: request.source_ip.clone(),
                    dest_ip: request.dest_ip.clone(),
                    dest_port: request.dest_port,
                    rule_id: rule_id.clone(),
                    reason: reason.clone(),
                });
                if self.blocked_connections.len() > self.block_history_limit {
                    self.blocked_connections.pop_front();
                }
                self.recent_block_times.push_back(sim_time);
                if log_matches {
                    self.logger.log_security(
                        format!("connection {}:{} -> {} blocked: {reason}", request.source_ip, request.dest_port, request.dest_ip),
                        Severity::Warning,
                        Some(request.source_ip.clone()),
                    );
                }
                (false, reason)
            }
        }
    }

    pub fn block_rate_per_minute(&self, sim_time: f64) -> f64 {
        self.recent_block_times.iter().filter(|&&t| sim_time - t <= 60.0).count() as f64
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "rule_count": self.rules.len(),
            "total_connections_allowed": self.total_connections_allowed,
            "total_connections_blocked": self.total_connections_blocked,
            "blocked_history_len": self.blocked_connections.len(),
            "block_rate_alarm_active": self.block_rate_alarm_active,
            "scan": self.stats.status(),
        })
    }
}

#[async_trait]
impl ScanController for Firewall {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    async fn read_inputs(&mut self) -> SimResult<()> {
        Ok(())
    }

    async fn execute_logic(&mut self) -> SimResult<()> {
        Ok(())
    }

    async fn write_outputs(&mut self) -> SimResult<()> {
        Ok(())
    }

    async fn run_diagnostics(&mut self) -> SimResult<()> {
        let sim_time = self.stats.last_scan_time();
        while self.recent_block_times.front().is_some_and(|&t| sim_time - t > 60.0) {
            self.recent_block_times.pop_front();
        }
        let rate = self.recent_block_times.len() as f64;

        if rate > FIREWALL_BLOCK_RATE_ALARM && !self.block_rate_alarm_active {
            self.block_rate_alarm_active = true;
            self.logger.log_alarm(
                format!("firewall block rate {rate}/min exceeds alarm threshold"),
                AlarmPriority::High,
                AlarmState::Active,
            );
        } else if rate < FIREWALL_BLOCK_RATE_CLEAR && self.block_rate_alarm_active {
            self.block_rate_alarm_active = false;
            self.logger.log_alarm("firewall block rate back within normal range", AlarmPriority::High, AlarmState::Cleared);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantsim_store::clock::{ClockMode, SimulationClock};
    use plantsim_store::logger::LoggerRegistry;
    use plantsim_store::store::StateStore;

    fn make_firewall() -> Firewall {
        let store = StateStore::with_default_capacity();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let logger = LoggerRegistry::new(clock, store).get_logger("firewall", None);
        Firewall::new("fw_1", logger)
    }

    fn request() -> ConnectionRequest {
        ConnectionRequest {
            source_ip: "10.0.0.5".into(),
            source_zone: "enterprise".into(),
            dest_ip: "10.1.0.5".into(),
            dest_zone: "control".into(),
            dest_port: 502,
            protocol: RuleProtocol::ModbusTcp,
        }
    }

    #[test]
    fn first_matching_rule_by_priority_wins() {
        let mut fw = make_firewall();
        fw.add_rule(FirewallRule::new("r2", "allow modbus", 20, RuleAction::Allow).to_zone("control").for_protocol(RuleProtocol::ModbusTcp));
        fw.add_rule(FirewallRule::new("r1", "deny enterprise to control", 10, RuleAction::Deny).from_zone("enterprise").to_zone("control"));

        let (allowed, _) = fw.check_connection(&request(), 0.0);
        assert!(!allowed, "lower-priority-number rule must win");
    }

    #[test]
    fn unmatched_connection_falls_through_to_default_deny() {
        let mut fw = make_firewall();
        let (allowed, _) = fw.check_connection(&request(), 0.0);
        assert!(!allowed);
        assert_eq!(fw.total_connections_blocked, 1);
    }

    #[tokio::test]
    async fn sustained_block_rate_raises_and_clears_alarm() {
        let mut fw = make_firewall();
        for _ in 0..60 {
            fw.check_connection(&request(), 10.0);
        }
        fw.run_diagnostics().await.unwrap();
        assert!(fw.block_rate_alarm_active);
    }
}
