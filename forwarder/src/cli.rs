//! Command-line configuration for the forwarder binary.
//!
//! Grounded in `shelter::commands::base::Cli`/`shelter::commands::dns::DNSServerTypeSubCommand`:
//! one top-level `clap::Parser` struct with `#[arg(...)]` flags carrying their
//! own defaults and doc comments, the same shape `shelter` uses for its
//! transport subcommands. Repeated flags (`--upstream`, `--bootstrap`, ...)
//! take the place of a config file, which stays out of scope for the core
//! per its module doc comment.

use std::net::SocketAddr;

/// Starts a recursive DNS forwarder: a single bound listener pair in front
/// of the resolution chain assembled from these flags.
#[derive(Debug, clap::Parser)]
#[command(name = "dns-forwarder", version)]
pub struct Cli {
    /// Address to bind the UDP listener to.
    #[arg(long = "listen-udp", default_value = "127.0.0.1:1053")]
    pub listen_udp: SocketAddr,

    /// Address to bind the TCP listener to. Pass the same value as
    /// `--listen-udp` to serve both transports on one port.
    #[arg(long = "listen-tcp", default_value = "127.0.0.1:1053")]
    pub listen_tcp: SocketAddr,

    /// One upstream server, repeatable. Format: `<transport>://<addr>[#tls-name]`,
    /// transport one of `udp`, `tcp`, `tls`, `https`. Example:
    /// `tls://1.1.1.1:853#cloudflare-dns.com`.
    #[arg(long = "upstream", required = true)]
    pub upstreams: Vec<String>,

    /// Client-match rule assigning a subset of `--upstream` entries (by
    /// address) to a named group, repeatable. Format: `<matcher>=<group>`.
    /// A bare group name with no matching rule falls back to `default`.
    #[arg(long = "upstream-group-rule")]
    pub upstream_group_rules: Vec<String>,

    /// Upstream fan-out strategy within a group.
    #[arg(long = "selection-strategy", default_value = "parallel-best")]
    pub selection_strategy: String,

    /// Per-upstream query timeout.
    #[arg(long = "upstream-timeout-ms", default_value_t = 2000)]
    pub upstream_timeout_ms: u64,

    /// Static `hostname=ip1,ip2` pairs the bootstrap resolver uses instead
    /// of recursively resolving an upstream's own hostname, repeatable.
    #[arg(long = "bootstrap")]
    pub bootstrap: Vec<String>,

    /// Maximum number of cached questions.
    #[arg(long = "cache-size", default_value_t = 4096)]
    pub cache_size: usize,

    /// Floor applied to every cached positive TTL, in seconds.
    #[arg(long = "min-caching-time-secs", default_value_t = 0)]
    pub min_caching_time_secs: u64,

    /// Ceiling applied to every cached positive TTL, in seconds. Omit to
    /// disable the cache entirely.
    #[arg(long = "max-caching-time-secs")]
    pub max_caching_time_secs: Option<u64>,

    /// TTL applied to cached negative (NXDOMAIN / empty NOERROR) answers.
    #[arg(long = "negative-caching-time-secs", default_value_t = 60)]
    pub negative_caching_time_secs: u64,

    /// Minimum hit count before an evicted entry is eagerly re-resolved.
    #[arg(long = "prefetch-threshold", default_value_t = 5)]
    pub prefetch_threshold: u64,

    /// Enables the DNSSEC validator stage.
    #[arg(long = "dnssec", default_value_t = false)]
    pub dnssec: bool,

    /// How the blocking resolver answers a blocked question: `ZeroIP`,
    /// `NxDomain`, or a comma-separated list of literal destination IPs.
    #[arg(long = "block-type", default_value = "ZeroIP")]
    pub block_type: String,

    /// TTL attached to blocked answers, in seconds.
    #[arg(long = "block-ttl-secs", default_value_t = 6 * 60 * 60)]
    pub block_ttl_secs: u64,

    /// Inline denylist entry, repeatable. Format: `<group>:<domain-or-glob-or-ip>`.
    #[arg(long = "block")]
    pub block_entries: Vec<String>,

    /// Inline allowlist entry, repeatable. Same format as `--block`.
    #[arg(long = "allow")]
    pub allow_entries: Vec<String>,

    /// Blocking group applied when no client rule matches, repeatable.
    #[arg(long = "default-block-group", default_value = "default")]
    pub default_block_groups: Vec<String>,

    /// Static custom DNS mapping, repeatable. Format:
    /// `<name>=<rtype>:<rdata>:<ttl-secs>` (e.g. `internal.example.com.=A:10.0.0.5:300`).
    #[arg(long = "custom-dns")]
    pub custom_dns: Vec<String>,

    /// DNS64 synthesis prefix, repeatable. Format: `<ipv6-prefix>/<length>`,
    /// length one of 32/40/48/56/64/96.
    #[arg(long = "dns64-prefix")]
    pub dns64_prefixes: Vec<String>,

    /// Rejects non-FQDN questions with NXDOMAIN.
    #[arg(long = "fqdn-only", default_value_t = false)]
    pub fqdn_only: bool,

    /// Query type to short-circuit with an empty NOERROR, repeatable
    /// (e.g. `HTTPS`, `SVCB`).
    #[arg(long = "filter-type")]
    pub filter_types: Vec<String>,

    /// Attaches an Extended DNS Error option to non-Resolved responses.
    #[arg(long = "ede", default_value_t = true)]
    pub ede: bool,

    /// IPv4 EDNS Client Subnet mask to attach to forwarded queries.
    #[arg(long = "ecs-v4-mask")]
    pub ecs_v4_mask: Option<u8>,

    /// IPv6 EDNS Client Subnet mask to attach to forwarded queries.
    #[arg(long = "ecs-v6-mask")]
    pub ecs_v6_mask: Option<u8>,

    /// Picks which of several PTR names to report when a reverse lookup
    /// returns more than one.
    #[arg(long = "single-name-order", default_value_t = 0)]
    pub single_name_order: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn at_least_one_upstream_is_required() {
        let result = Cli::try_parse_from(["dns-forwarder"]);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_match_a_minimal_invocation() {
        let cli = Cli::try_parse_from(["dns-forwarder", "--upstream", "udp://8.8.8.8:53"]).unwrap();
        assert_eq!(cli.listen_udp, "127.0.0.1:1053".parse().unwrap());
        assert_eq!(cli.selection_strategy, "parallel-best");
        assert_eq!(cli.cache_size, 4096);
        assert_eq!(cli.block_type, "ZeroIP");
        assert!(cli.ede);
        assert!(!cli.dnssec);
        assert!(!cli.fqdn_only);
    }

    #[test]
    fn repeated_upstream_flags_accumulate() {
        let cli = Cli::try_parse_from([
            "dns-forwarder",
            "--upstream",
            "udp://8.8.8.8:53",
            "--upstream",
            "udp://1.1.1.1:53",
        ])
        .unwrap();
        assert_eq!(cli.upstreams, vec!["udp://8.8.8.8:53".to_string(), "udp://1.1.1.1:53".to_string()]);
    }
}
