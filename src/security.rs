//! Security filter
//!
//! Allow/deny evaluation for inbound client addresses, following the usual
//! unix hosts.allow/hosts.deny rules: an allow-list match always wins, then
//! the deny list (including a wildcard deny-all) applies, otherwise access
//! is allowed. Empty lists disable access control entirely.

use std::net::IpAddr;

use crate::config::SecurityConfig;
use crate::error::{AppError, Result};

/// A single allow/deny entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMatcher {
    /// "*" matches every address
    Any,
    Exact(IpAddr),
}

impl HostMatcher {
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        if entry == "*" {
            return Ok(Self::Any);
        }
        entry
            .parse()
            .map(Self::Exact)
            .map_err(|_| AppError::Config(format!("Invalid address in security list: {}", entry)))
    }

    fn matches(&self, addr: IpAddr) -> bool {
        match self {
            HostMatcher::Any => true,
            HostMatcher::Exact(ip) => *ip == addr,
        }
    }
}

/// Stateless allow/deny policy, evaluated per inbound connection
pub struct AccessPolicy {
    allow: Vec<HostMatcher>,
    deny: Vec<HostMatcher>,
}

impl AccessPolicy {
    pub fn new(allow: Vec<HostMatcher>, deny: Vec<HostMatcher>) -> Self {
        Self { allow, deny }
    }

    /// Policy that allows everything
    pub fn allow_all() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let parse = |entries: &[String]| -> Result<Vec<HostMatcher>> {
            entries
                .iter()
                .filter(|e| !e.trim().is_empty())
                .map(|e| HostMatcher::parse(e))
                .collect()
        };
        Ok(Self::new(parse(&config.allow)?, parse(&config.deny)?))
    }

    /// First match wins: allow list, then deny list, then default allow
    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        if !self.allow.is_empty() && self.allow.iter().any(|m| m.matches(addr)) {
            return true;
        }
        if self.deny.iter().any(|m| m.matches(addr)) {
            return false;
        }
        true
    }
}
