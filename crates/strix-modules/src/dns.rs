// crates/strix-modules/src/dns.rs
// ============================================================================
// Module: DNS Resolve Module
// Description: Resolves hostnames to addresses using the system resolver.
// Purpose: Turn DOMAIN_NAME and INTERNET_NAME events into address events.
// Dependencies: strix-core, std::net
// ============================================================================

//! ## Overview
//! `sfp_dnsresolve` consumes hostname events and emits one address event per
//! resolved A/AAAA record, linked to the hostname that produced it. For a
//! domain seed it also probes the conventional `www` host and emits an
//! `INTERNET_NAME` event when it resolves. Resolution failures are durable
//! scan log entries, not errors; an unresolvable target simply produces no
//! children.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::ToSocketAddrs;

use strix_core::Event;
use strix_core::EventDraft;
use strix_core::LogLevel;
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

// ============================================================================
// SECTION: Module
// ============================================================================

/// Stable module name.
const MODULE_NAME: &str = "sfp_dnsresolve";

/// DNS resolution module backed by the system resolver.
pub struct DnsResolveModule {
    /// Static descriptor.
    descriptor: ModuleDescriptor,
}

impl DnsResolveModule {
    /// Creates a fresh instance for one scan.
    #[must_use]
    pub fn new() -> Self {
        let mut opt_defaults = BTreeMap::new();
        opt_defaults.insert("probe_www".to_string(), "true".to_string());
        let mut opt_descriptions = BTreeMap::new();
        opt_descriptions.insert(
            "probe_www".to_string(),
            "Probe the conventional www host under domain seeds".to_string(),
        );
        Self {
            descriptor: ModuleDescriptor {
                name: ModuleName::from_static(MODULE_NAME),
                meta: ModuleMeta {
                    human_name: "DNS Resolver".to_string(),
                    summary: "Resolves hostnames to IPv4/IPv6 addresses".to_string(),
                    category: "DNS".to_string(),
                    use_cases: vec![UseCase::Passive, UseCase::Footprint, UseCase::Investigate],
                },
                watched_events: vec![
                    event_types::DOMAIN_NAME.to_string(),
                    event_types::INTERNET_NAME.to_string(),
                ],
                produced_events: vec![
                    event_types::IP_ADDRESS.to_string(),
                    event_types::IPV6_ADDRESS.to_string(),
                    event_types::INTERNET_NAME.to_string(),
                ],
                opt_defaults,
                opt_descriptions,
                flags: ModuleFlags {
                    passive: true,
                    needs_api_key: false,
                    invasive: false,
                    thread_safe: true,
                },
            },
        }
    }

    /// Resolves a hostname to its addresses via the system resolver.
    fn resolve(host: &str) -> Option<Vec<IpAddr>> {
        (host, 0u16)
            .to_socket_addrs()
            .ok()
            .map(|addrs| addrs.map(|addr| addr.ip()).collect())
    }

    /// Emits one address event per resolved address.
    fn emit_addresses(
        ctx: &dyn ScanContext,
        source: &Event,
        addresses: &[IpAddr],
    ) -> Result<(), ModuleError> {
        for address in addresses {
            let event_type = match address {
                IpAddr::V4(_) => event_types::IP_ADDRESS,
                IpAddr::V6(_) => event_types::IPV6_ADDRESS,
            };
            ctx.notify_listeners(&source.hash, EventDraft::new(event_type, address.to_string()))?;
        }
        Ok(())
    }
}

impl Default for DnsResolveModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for DnsResolveModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn setup(&self, ctx: &dyn ScanContext) -> Result<(), SetupError> {
        if let Some(raw) = ctx.get_option("probe_www")
            && raw.parse::<bool>().is_err()
        {
            return Err(SetupError::InvalidOption {
                key: "probe_www".to_string(),
                message: format!("expected true or false, got {raw}"),
            });
        }
        Ok(())
    }

    fn handle_event(&self, ctx: &dyn ScanContext, event: &Event) -> Result<(), ModuleError> {
        if ctx.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let host = event.data.trim();
        if host.is_empty() {
            return Ok(());
        }
        match Self::resolve(host) {
            Some(addresses) if !addresses.is_empty() => {
                Self::emit_addresses(ctx, event, &addresses)?;
            }
            _ => {
                ctx.log(LogLevel::Info, &format!("could not resolve {host}"));
            }
        }
        let probe_www = ctx
            .get_option("probe_www")
            .and_then(|raw| raw.parse::<bool>().ok())
            .unwrap_or(true);
        if probe_www && event.event_type == event_types::DOMAIN_NAME {
            if ctx.is_cancelled() {
                return Err(ModuleError::Cancelled);
            }
            let www = format!("www.{host}");
            if Self::resolve(&www).is_some_and(|addresses| !addresses.is_empty()) {
                ctx.notify_listeners(
                    &event.hash,
                    EventDraft::new(event_types::INTERNET_NAME, www),
                )?;
            }
        }
        Ok(())
    }
}
