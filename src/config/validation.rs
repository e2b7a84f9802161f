//! Configuration validation

use super::{Config, Zone};
use crate::telemetry::parse_level;

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL)
const MAX_IFNAME_LEN: usize = 15;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_logging(config, &mut result);
    validate_conntrack(config, &mut result);
    validate_interfaces(config, &mut result);

    result
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    if parse_level(&config.logging.level).is_none() {
        result.error(format!(
            "logging.level: unknown level '{}' (expected error, warn, info, debug or trace)",
            config.logging.level
        ));
    }
}

fn validate_conntrack(config: &Config, result: &mut ValidationResult) {
    let ct = &config.conntrack;

    if ct.max_entries == 0 {
        result.error("conntrack.max_entries: must be greater than 0");
    }

    for (name, secs) in [
        ("syn_timeout", ct.syn_timeout),
        ("established_timeout", ct.established_timeout),
        ("closed_grace", ct.closed_grace),
        ("udp_timeout", ct.udp_timeout),
        ("icmp_timeout", ct.icmp_timeout),
        ("eviction_interval", ct.eviction_interval),
    ] {
        if secs == 0 {
            result.error(format!("conntrack.{}: must be greater than 0", name));
        }
    }

    if ct.closed_grace > ct.syn_timeout {
        result.warn(format!(
            "conntrack.closed_grace ({}s) exceeds syn_timeout ({}s); closed flows outlive half-open ones",
            ct.closed_grace, ct.syn_timeout
        ));
    }

    if ct.syn_timeout > ct.established_timeout {
        result.warn(format!(
            "conntrack.syn_timeout ({}s) exceeds established_timeout ({}s)",
            ct.syn_timeout, ct.established_timeout
        ));
    }

    if ct.eviction_batch == 0 {
        result.warn("conntrack.eviction_batch: 0 disables the per-pass eviction limit");
    }
}

fn validate_interfaces(config: &Config, result: &mut ValidationResult) {
    if config.interfaces.is_empty() {
        result.error("interfaces: no interfaces configured");
        return;
    }

    for name in config.interfaces.keys() {
        if name.is_empty() || name.len() > MAX_IFNAME_LEN {
            result.error(format!(
                "interfaces.{}: name must be 1-{} characters",
                name, MAX_IFNAME_LEN
            ));
        }
    }

    for (zone, members) in config.zones() {
        if matches!(zone, Zone::Shared(_)) && members.len() == 1 {
            result.warn(format!(
                "zone {}: only interface {} uses it, the table is not shared",
                zone, members[0]
            ));
        }
    }

    for name in config.zone_name_clashes() {
        result.error(format!(
            "interfaces.{}: has no zone but zone {} is declared; set zone explicitly",
            name, name
        ));
    }
}
