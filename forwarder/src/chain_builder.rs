//! Turns a parsed [`Cli`] into an assembled resolution chain.
//!
//! Construction follows `spec.md` §2's "leaves-first dependency order":
//! upstream resolvers and the group selector are built first (the chain's
//! tail), then each stage wraps the one before it until the entry point
//! (the small single-decision stages) is reached.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use dns_forwarder_core::config::{BlockType, SelectionStrategy};
use dns_forwarder_core::error::{CoreError, Result};
use dns_forwarder_core::events::EventBus;
use dns_forwarder_core::resolvers::blocking::groups::{compile_groups, GroupSpec, StaticListSource};
use dns_forwarder_core::resolvers::blocking::{BlockingConfig, BlockingResolver};
use dns_forwarder_core::resolvers::bootstrap::BootstrapResolver;
use dns_forwarder_core::resolvers::cache::{CacheConfig, CachingResolver};
use dns_forwarder_core::resolvers::client_names::{ClientNamesConfig, ClientNamesResolver};
use dns_forwarder_core::resolvers::custom_dns::{CustomDnsConfig, CustomDnsEntry, CustomDnsResolver};
use dns_forwarder_core::resolvers::dns64::{Dns64Config, Dns64Resolver};
use dns_forwarder_core::resolvers::dnssec::{DnssecConfig, DnssecValidator, TrustAnchorStore};
use dns_forwarder_core::resolvers::ecs::{EcsConfig, EcsResolver};
use dns_forwarder_core::resolvers::ede::EdeResolver;
use dns_forwarder_core::resolvers::filtering::FilteringResolver;
use dns_forwarder_core::resolvers::fqdn_only::FqdnOnlyResolver;
use dns_forwarder_core::resolvers::special_use::SpecialUseResolver;
use dns_forwarder_core::resolvers::upstream::{UpstreamEndpointConfig, UpstreamResolver, UpstreamTransport};
use dns_forwarder_core::resolvers::upstream_group::{UpstreamGroup, UpstreamGroupSelector};
use dns_forwarder_core::util::ClientMatcher;
use dns_forwarder_core::ChainLink;
use hickory_proto::rr::{RData, RecordType};

use crate::cli::Cli;

pub struct Chain {
    pub head: ChainLink,
    pub blocking: Arc<BlockingResolver>,
    pub client_names: Option<Arc<ClientNamesResolver>>,
}

/// `<transport>://<addr>[#tls-name]`, e.g. `tls://1.1.1.1:853#cloudflare-dns.com`.
fn parse_upstream(raw: &str, timeout: Duration) -> Result<UpstreamEndpointConfig> {
    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| CoreError::config("upstream", format!("missing scheme in '{raw}'")))?;
    let (addr_part, tls_name) = match rest.split_once('#') {
        Some((addr, name)) => (addr, Some(name.to_string())),
        None => (rest, None),
    };
    let transport = match scheme {
        "udp" => UpstreamTransport::Udp,
        "tcp" => UpstreamTransport::Tcp,
        "tls" => UpstreamTransport::Tls,
        "https" => UpstreamTransport::Https,
        other => return Err(CoreError::config("upstream", format!("unknown transport '{other}'"))),
    };
    let addr = addr_part
        .parse()
        .map_err(|e| CoreError::config("upstream", format!("invalid address '{addr_part}': {e}")))?;
    Ok(UpstreamEndpointConfig {
        addr,
        transport,
        timeout,
        tls_dns_name: tls_name,
    })
}

fn parse_bootstrap(raw: &str) -> Result<(String, Vec<IpAddr>)> {
    let (host, ips) = raw
        .split_once('=')
        .ok_or_else(|| CoreError::config("bootstrap", format!("expected 'host=ip1,ip2' in '{raw}'")))?;
    let ips = ips
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<IpAddr>()
                .map_err(|e| CoreError::config("bootstrap", format!("invalid ip '{s}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((host.to_string(), ips))
}

fn parse_block_entry(raw: &str) -> Result<(String, String)> {
    raw.split_once(':')
        .map(|(g, v)| (g.to_string(), v.to_string()))
        .ok_or_else(|| CoreError::config("block", format!("expected '<group>:<entry>' in '{raw}'")))
}

fn parse_custom_dns(raw: &str) -> Result<(String, CustomDnsEntry)> {
    let (name, rest) = raw
        .split_once('=')
        .ok_or_else(|| CoreError::config("custom-dns", format!("expected '<name>=<rtype>:<rdata>:<ttl>' in '{raw}'")))?;
    let mut parts = rest.splitn(3, ':');
    let rtype_s = parts.next().unwrap_or_default();
    let rdata_s = parts.next().unwrap_or_default();
    let ttl_s = parts.next().unwrap_or("300");
    let ttl: u32 = ttl_s
        .parse()
        .map_err(|e| CoreError::config("custom-dns", format!("invalid ttl '{ttl_s}': {e}")))?;

    let rtype = match rtype_s.to_ascii_uppercase().as_str() {
        "A" => RecordType::A,
        "AAAA" => RecordType::AAAA,
        "CNAME" => RecordType::CNAME,
        other => return Err(CoreError::config("custom-dns", format!("unsupported rtype '{other}'"))),
    };
    let rdata = match rtype {
        RecordType::A => RData::A(
            rdata_s
                .parse()
                .map_err(|e| CoreError::config("custom-dns", format!("invalid A rdata '{rdata_s}': {e}")))?,
        ),
        RecordType::AAAA => RData::AAAA(
            rdata_s
                .parse()
                .map_err(|e| CoreError::config("custom-dns", format!("invalid AAAA rdata '{rdata_s}': {e}")))?,
        ),
        RecordType::CNAME => RData::CNAME(
            hickory_proto::rr::Name::from_ascii(rdata_s)
                .map_err(|e| CoreError::config("custom-dns", format!("invalid CNAME rdata '{rdata_s}': {e}")))?,
        ),
        _ => unreachable!(),
    };
    Ok((name.to_string(), CustomDnsEntry { rtype, rdata, ttl }))
}

fn parse_dns64_prefix(raw: &str) -> Result<(Ipv6Addr, u8)> {
    let (addr, len) = raw
        .split_once('/')
        .ok_or_else(|| CoreError::config("dns64-prefix", format!("expected '<ipv6>/<len>' in '{raw}'")))?;
    let addr: Ipv6Addr = addr
        .parse()
        .map_err(|e| CoreError::config("dns64-prefix", format!("invalid prefix '{addr}': {e}")))?;
    let len: u8 = len
        .parse()
        .map_err(|e| CoreError::config("dns64-prefix", format!("invalid length '{len}': {e}")))?;
    Ok((addr, len))
}

/// Assembles the full chain per `cli`, honoring `spec.md` §2's ordering.
pub async fn build(cli: &Cli, events: EventBus) -> Result<Chain> {
    let timeout = Duration::from_millis(cli.upstream_timeout_ms);

    let bootstrap_pairs = cli
        .bootstrap
        .iter()
        .map(|s| parse_bootstrap(s))
        .collect::<Result<Vec<_>>>()?;
    // Held so a future hostname-based `--upstream` (today every transport
    // dials a literal IP) can resolve through it instead of the system
    // resolver; not consulted yet since `parse_upstream` only accepts IPs.
    let _bootstrap = Arc::new(BootstrapResolver::new(bootstrap_pairs, None));

    let mut endpoint_configs = Vec::new();
    for raw in &cli.upstreams {
        endpoint_configs.push(parse_upstream(raw, timeout)?);
    }
    if endpoint_configs.is_empty() {
        return Err(CoreError::config("upstream", "at least one --upstream is required"));
    }

    let upstreams: Vec<Arc<UpstreamResolver>> = endpoint_configs
        .into_iter()
        .map(|cfg| Arc::new(UpstreamResolver::new(cfg)))
        .collect();

    let strategy = match cli.selection_strategy.as_str() {
        "strict-order" | "strict_order" => SelectionStrategy::StrictOrder,
        _ => SelectionStrategy::ParallelBest,
    };
    let default_group = UpstreamGroup::new("default", upstreams, strategy);

    let mut group_client_rules = Vec::new();
    for raw in &cli.upstream_group_rules {
        let (matcher, group) = raw
            .split_once('=')
            .ok_or_else(|| CoreError::config("upstream-group-rule", format!("expected '<matcher>=<group>' in '{raw}'")))?;
        group_client_rules.push((ClientMatcher::parse(matcher), group.to_string()));
    }

    let selector: ChainLink = Arc::new(UpstreamGroupSelector::new(vec![default_group], group_client_rules));

    let cache_config = CacheConfig {
        min_caching_time: Duration::from_secs(cli.min_caching_time_secs),
        max_caching_time: cli.max_caching_time_secs.map(Duration::from_secs),
        negative_cache_time: Duration::from_secs(cli.negative_caching_time_secs),
        prefetch_enabled: true,
        prefetch_threshold: cli.prefetch_threshold,
        cache_size: cli.cache_size,
    };
    let cache: ChainLink = Arc::new(CachingResolver::new(selector, cache_config, events.clone()));

    let dnssec_config = DnssecConfig::default();
    let dnssec: ChainLink = Arc::new(DnssecValidator::new(cache, TrustAnchorStore::with_root_anchors()?, dnssec_config, cli.dnssec));

    let block_type = BlockType::parse(&cli.block_type)?;
    let blocking_config = BlockingConfig {
        block_type,
        block_ttl: Duration::from_secs(cli.block_ttl_secs),
    };
    let mut groups_by_name: HashMap<String, (Vec<String>, Vec<String>)> = HashMap::new();
    for raw in &cli.block_entries {
        let (group, entry) = parse_block_entry(raw)?;
        groups_by_name.entry(group).or_default().0.push(entry);
    }
    for raw in &cli.allow_entries {
        let (group, entry) = parse_block_entry(raw)?;
        groups_by_name.entry(group).or_default().1.push(entry);
    }
    for group in &cli.default_block_groups {
        groups_by_name.entry(group.clone()).or_default();
    }
    let group_specs = groups_by_name
        .into_iter()
        .map(|(name, (deny, allow))| GroupSpec {
            name,
            denylist_sources: vec![Arc::new(StaticListSource::new(deny))],
            denylist_ip_sources: vec![Arc::new(StaticListSource::new(Vec::new()))],
            allowlist_sources: vec![Arc::new(StaticListSource::new(allow))],
            allowlist_ip_sources: vec![Arc::new(StaticListSource::new(Vec::new()))],
        })
        .collect();
    let compiled_groups = compile_groups(group_specs, dns_forwarder_core::config::StartStrategy::Blocking, &events).await?;
    let blocking = Arc::new(BlockingResolver::new(
        dnssec,
        compiled_groups,
        Vec::new(),
        cli.default_block_groups.clone(),
        blocking_config,
        events.clone(),
    ));
    let blocking_link: ChainLink = blocking.clone();

    let mut forward: HashMap<String, Vec<CustomDnsEntry>> = HashMap::new();
    for raw in &cli.custom_dns {
        let (name, entry) = parse_custom_dns(raw)?;
        forward.entry(name).or_default().push(entry);
    }
    let custom_dns: ChainLink = Arc::new(CustomDnsResolver::new(
        blocking_link,
        forward,
        HashMap::new(),
        CustomDnsConfig::default(),
    ));

    let dns64_prefixes = cli
        .dns64_prefixes
        .iter()
        .map(|s| parse_dns64_prefix(s))
        .collect::<Result<Vec<_>>>()?;
    let dns64: ChainLink = Arc::new(Dns64Resolver::new(custom_dns, Dns64Config::new(dns64_prefixes)));

    let client_names = Arc::new(ClientNamesResolver::new(
        dns64,
        HashMap::new(),
        None,
        512,
        ClientNamesConfig {
            single_name_order: cli.single_name_order,
        },
    ));
    let client_names_link: ChainLink = client_names.clone();

    let ecs_config = EcsConfig {
        ipv4_mask: cli.ecs_v4_mask,
        ipv6_mask: cli.ecs_v6_mask,
    };
    let ecs: ChainLink = Arc::new(EcsResolver::new(client_names_link, ecs_config));

    let ede: ChainLink = Arc::new(EdeResolver::new(ecs, cli.ede));

    let mut filter_types = std::collections::HashSet::new();
    for raw in &cli.filter_types {
        let parsed: RecordType = raw
            .parse()
            .map_err(|_| CoreError::config("filter-type", format!("unknown record type '{raw}'")))?;
        filter_types.insert(parsed);
    }
    let filtering: ChainLink = Arc::new(FilteringResolver::new(ede, filter_types));

    let special_use: ChainLink = Arc::new(SpecialUseResolver::new(filtering));

    let fqdn_only: ChainLink = Arc::new(FqdnOnlyResolver::new(special_use, cli.fqdn_only));

    Ok(Chain {
        head: fqdn_only,
        blocking,
        client_names: Some(client_names),
    })
}
