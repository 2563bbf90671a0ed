//! The bootstrap resolver: resolves upstream hostnames without touching the
//! main chain, per `spec.md` §4.2.
//!
//! This does not implement [`ChainResolver`] — it is consulted once per
//! configured upstream at chain-construction time, before the real pipeline
//! exists, so it cannot be a node *within* that pipeline. Its own minimal
//! sub-chain (filtering + caching + parallel-best upstream, wired by the
//! caller the same way the main chain is) is just another [`ChainLink`], so
//! it is built with the identical constructor-injection pattern as every
//! other stage.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use hickory_proto::rr::RecordType;

use crate::chain::ChainLink;
use crate::error::Result;
use crate::model::{Protocol, Request};

/// A resolved set of addresses for one upstream, with an atomically
/// advancing round-robin cursor so repeated calls spread load across all of
/// an upstream's addresses instead of pinning the first one.
#[derive(Debug)]
pub struct IpSet {
    ips: Vec<IpAddr>,
    cursor: AtomicUsize,
}

impl IpSet {
    pub fn new(ips: Vec<IpAddr>) -> Self {
        Self {
            ips,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    pub fn all(&self) -> &[IpAddr] {
        &self.ips
    }

    /// Advances the cursor and returns the next address, wrapping around.
    /// Returns `None` only for an empty set.
    pub fn next(&self) -> Option<IpAddr> {
        if self.ips.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.ips.len();
        Some(self.ips[idx])
    }
}

/// Resolves `(hostname-or-IP, [IP…])` pairs to address sets. A pair whose
/// first element is already a literal IP never touches the sub-chain.
pub struct BootstrapResolver {
    explicit_ips: HashMap<String, Vec<IpAddr>>,
    sub_chain: Option<ChainLink>,
    cache: tokio::sync::Mutex<HashMap<String, std::sync::Arc<IpSet>>>,
}

impl BootstrapResolver {
    /// `pairs` are the configured `(hostname-or-IP, [IP…])` entries. When
    /// a pair supplies no IPs, its hostname is resolved through
    /// `sub_chain` on first use. `sub_chain` is `None` only when the
    /// deployment has no bootstrap configuration at all, in which case
    /// every lookup falls back to the host OS resolver.
    pub fn new(pairs: Vec<(String, Vec<IpAddr>)>, sub_chain: Option<ChainLink>) -> Self {
        let mut explicit_ips = HashMap::new();
        for (host, ips) in pairs {
            if !ips.is_empty() {
                explicit_ips.insert(host, ips);
            }
        }
        Self {
            explicit_ips,
            sub_chain,
            cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// `UpstreamIPs(ctx, upstream) -> IPSet`.
    pub async fn upstream_ips(&self, upstream: &str) -> Result<std::sync::Arc<IpSet>> {
        if let Ok(ip) = upstream.parse::<IpAddr>() {
            return Ok(std::sync::Arc::new(IpSet::new(vec![ip])));
        }

        if let Some(ips) = self.explicit_ips.get(upstream) {
            return Ok(std::sync::Arc::new(IpSet::new(ips.clone())));
        }

        {
            let cached = self.cache.lock().await;
            if let Some(set) = cached.get(upstream) {
                return Ok(set.clone());
            }
        }

        let ips = self.resolve_hostname(upstream).await?;
        let set = std::sync::Arc::new(IpSet::new(ips));
        self.cache.lock().await.insert(upstream.to_string(), set.clone());
        Ok(set)
    }

    async fn resolve_hostname(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        let mut ips = Vec::new();
        if let Some(chain) = &self.sub_chain {
            for qtype in [RecordType::A, RecordType::AAAA] {
                let message = build_bootstrap_query(hostname, qtype)?;
                let mut request = Request::new(
                    message,
                    "0.0.0.0:0".parse().expect("static bootstrap address"),
                    Protocol::Udp,
                );
                if let Ok(response) = chain.resolve(&mut request).await {
                    for record in response.message.answers() {
                        if let Some(ip) = record_to_ip(record) {
                            ips.push(ip);
                        }
                    }
                }
            }
        } else {
            // No bootstrap configured: defer to whatever the host OS
            // resolves via its own `/etc/resolv.conf`-equivalent config.
            let resolver = hickory_resolver::TokioAsyncResolver::tokio_from_system_conf()?;
            if let Ok(lookup) = resolver.lookup_ip(hostname).await {
                ips.extend(lookup.iter());
            }
        }
        Ok(ips)
    }
}

fn build_bootstrap_query(
    hostname: &str,
    qtype: RecordType,
) -> Result<hickory_proto::op::Message> {
    let name = hickory_proto::rr::Name::from_ascii(hostname)?;
    let mut message = hickory_proto::op::Message::new();
    message.set_message_type(hickory_proto::op::MessageType::Query);
    message.set_op_code(hickory_proto::op::OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(hickory_proto::op::Query::query(name, qtype));
    Ok(message)
}

fn record_to_ip(record: &hickory_proto::rr::Record) -> Option<IpAddr> {
    match record.data()? {
        hickory_proto::rr::RData::A(addr) => Some(IpAddr::V4((*addr).into())),
        hickory_proto::rr::RData::AAAA(addr) => Some(IpAddr::V6((*addr).into())),
        _ => None,
    }
}
