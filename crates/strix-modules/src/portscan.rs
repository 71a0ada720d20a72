// crates/strix-modules/src/portscan.rs
// ============================================================================
// Module: TCP Portscan Module
// Description: TCP connect probes with banner capture against address events.
// Purpose: Turn IP_ADDRESS events into open-port and banner events.
// Dependencies: strix-core, std::net
// ============================================================================

//! ## Overview
//! `sfp_portscan_tcp` connect-probes a configured port list against each
//! delivered address. An accepted connection emits `TCP_PORT_OPEN`; when the
//! service volunteers data within the read window, the first line is emitted
//! as `TCP_PORT_OPEN_BANNER` parented under the open-port event. The module
//! is invasive by design and excluded from passive use cases. Cancellation is
//! checked between ports so stop requests take effect promptly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Read;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::time::Duration;

use strix_core::Event;
use strix_core::EventDraft;
use strix_core::Module;
use strix_core::ModuleDescriptor;
use strix_core::ModuleError;
use strix_core::ModuleFlags;
use strix_core::ModuleMeta;
use strix_core::ModuleName;
use strix_core::ScanContext;
use strix_core::SetupError;
use strix_core::UseCase;
use strix_core::event_types;
use strix_core::hashing;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Stable module name.
const MODULE_NAME: &str = "sfp_portscan_tcp";
/// Default probed ports.
const DEFAULT_PORTS: &str = "21,22,25,80,110,143,443,3306,8080,8443";
/// Default connect/read timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 500;
/// Maximum banner bytes captured.
const BANNER_CAP: usize = 256;

// ============================================================================
// SECTION: Module
// ============================================================================

/// TCP connect probe module.
pub struct TcpPortscanModule {
    /// Static descriptor.
    descriptor: ModuleDescriptor,
}

impl TcpPortscanModule {
    /// Creates a fresh instance for one scan.
    #[must_use]
    pub fn new() -> Self {
        let mut opt_defaults = BTreeMap::new();
        opt_defaults.insert("ports".to_string(), DEFAULT_PORTS.to_string());
        opt_defaults.insert("timeout_ms".to_string(), DEFAULT_TIMEOUT_MS.to_string());
        let mut opt_descriptions = BTreeMap::new();
        opt_descriptions.insert(
            "ports".to_string(),
            "Comma-separated TCP ports to probe".to_string(),
        );
        opt_descriptions.insert(
            "timeout_ms".to_string(),
            "Connect and banner-read timeout in milliseconds".to_string(),
        );
        Self {
            descriptor: ModuleDescriptor {
                name: ModuleName::from_static(MODULE_NAME),
                meta: ModuleMeta {
                    human_name: "TCP Port Scanner".to_string(),
                    summary: "Probes common TCP ports and captures banners".to_string(),
                    category: "Crawling and Scanning".to_string(),
                    use_cases: vec![UseCase::Footprint],
                },
                watched_events: vec![event_types::IP_ADDRESS.to_string()],
                produced_events: vec![
                    event_types::TCP_PORT_OPEN.to_string(),
                    event_types::TCP_PORT_OPEN_BANNER.to_string(),
                ],
                opt_defaults,
                opt_descriptions,
                flags: ModuleFlags {
                    passive: false,
                    needs_api_key: false,
                    invasive: true,
                    thread_safe: true,
                },
            },
        }
    }

    /// Parses the configured port list.
    fn parse_ports(raw: &str) -> Result<Vec<u16>, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u16>().map_err(|_| format!("bad port: {part}")))
            .collect()
    }

    /// Attempts a banner read from an accepted connection.
    fn read_banner(stream: &mut TcpStream, timeout: Duration) -> Option<String> {
        stream.set_read_timeout(Some(timeout)).ok()?;
        let mut buffer = [0u8; BANNER_CAP];
        let read = stream.read(&mut buffer).ok()?;
        if read == 0 {
            return None;
        }
        let text = String::from_utf8_lossy(&buffer[.. read]);
        let line = text.lines().next()?.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

impl Default for TcpPortscanModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for TcpPortscanModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn setup(&self, ctx: &dyn ScanContext) -> Result<(), SetupError> {
        if let Some(raw) = ctx.get_option("ports") {
            Self::parse_ports(&raw).map_err(|message| SetupError::InvalidOption {
                key: "ports".to_string(),
                message,
            })?;
        }
        if let Some(raw) = ctx.get_option("timeout_ms")
            && raw.parse::<u64>().is_err()
        {
            return Err(SetupError::InvalidOption {
                key: "timeout_ms".to_string(),
                message: format!("expected milliseconds, got {raw}"),
            });
        }
        Ok(())
    }

    fn handle_event(&self, ctx: &dyn ScanContext, event: &Event) -> Result<(), ModuleError> {
        let Ok(address) = event.data.parse::<IpAddr>() else {
            tracing::debug!(scan = %ctx.scan_id(), data = %event.data, "skipping unparseable address");
            return Ok(());
        };
        let ports = ctx
            .get_option("ports")
            .as_deref()
            .map_or_else(|| Self::parse_ports(DEFAULT_PORTS), Self::parse_ports)
            .map_err(ModuleError::Transient)?;
        let timeout = Duration::from_millis(
            ctx.get_option("timeout_ms")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        );
        for port in ports {
            if ctx.is_cancelled() {
                return Err(ModuleError::Cancelled);
            }
            let target = SocketAddr::new(address, port);
            let Ok(mut stream) = TcpStream::connect_timeout(&target, timeout) else {
                continue;
            };
            let open_data = format!("{address}:{port}");
            ctx.notify_listeners(
                &event.hash,
                EventDraft::new(event_types::TCP_PORT_OPEN, open_data.clone()),
            )?;
            if let Some(banner) = Self::read_banner(&mut stream, timeout) {
                // Parent the banner under the open-port event it came from.
                let open_hash = hashing::event_hash(
                    event_types::TCP_PORT_OPEN,
                    &open_data,
                    Some(&event.hash),
                );
                ctx.notify_listeners(
                    &open_hash,
                    EventDraft::new(event_types::TCP_PORT_OPEN_BANNER, banner),
                )?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_list_parses() {
        assert_eq!(TcpPortscanModule::parse_ports("22, 80,443"), Ok(vec![22, 80, 443]));
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(TcpPortscanModule::parse_ports("22,eighty").is_err());
        assert!(TcpPortscanModule::parse_ports("70000").is_err());
    }
}
