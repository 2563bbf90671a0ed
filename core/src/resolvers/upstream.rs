//! A single upstream resolver: one remote endpoint and its transport, per
//! `spec.md` §4.3.
//!
//! Grounded in the teacher crate's use of `hickory_resolver` as the async
//! DNS transport (`shelter::commands::dns` builds its server on
//! `hickory_server`, which shares the same `hickory_proto` wire types this
//! module builds responses from). Rather than the stub-resolver's usual
//! "resolve a name to IPs" contract, this wraps a `TokioAsyncResolver`
//! pinned to exactly one `NameServerConfig` and reconstructs a full
//! `Message` from the returned `Lookup`, so the rest of the chain sees a
//! normal wire response instead of a flattened IP list.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::Record;

use crate::chain::ChainResolver;
use crate::error::{CoreError, Result};
use crate::model::{Request, Response, ResponseType};

/// Wire transport for one configured upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransport {
    Udp,
    Tcp,
    Tls,
    Https,
}

/// Everything needed to dial a single remote resolver.
#[derive(Debug, Clone)]
pub struct UpstreamEndpointConfig {
    pub addr: SocketAddr,
    pub transport: UpstreamTransport,
    pub timeout: Duration,
    /// Required for `Tls`/`Https`: the name presented for certificate
    /// verification (DoT/DoH both authenticate the server this way).
    pub tls_dns_name: Option<String>,
}

impl UpstreamEndpointConfig {
    fn label(&self) -> String {
        format!("{}({:?})", self.addr, self.transport)
    }

    fn into_resolver_config(&self) -> NameServerConfig {
        let protocol = match self.transport {
            UpstreamTransport::Udp => Protocol::Udp,
            UpstreamTransport::Tcp => Protocol::Tcp,
            UpstreamTransport::Tls => Protocol::Tls,
            UpstreamTransport::Https => Protocol::Https,
        };
        NameServerConfig {
            socket_addr: self.addr,
            protocol,
            tls_dns_name: self.tls_dns_name.clone(),
            trust_negative_responses: true,
            tls_config: None,
            bind_addr: None,
        }
    }
}

/// Per-upstream health tracking backing the "healthy / degraded / erroring"
/// state machine §4.9 calls out. There is no hard circuit breaker: the
/// weight this produces only biases `UpstreamGroupResolver`'s
/// parallel-best selection away from sick endpoints.
#[derive(Debug, Default)]
pub struct UpstreamHealth {
    fail_count: AtomicU64,
    last_error_secs: AtomicU64,
}

impl UpstreamHealth {
    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn record_success(&self) {
        self.fail_count.store(0, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.fail_count.fetch_add(1, Ordering::Relaxed);
        self.last_error_secs.store(Self::now_secs(), Ordering::Relaxed);
    }

    /// `recency × 1/(1+failCount)`, per §4.3. Recency decays linearly over
    /// five minutes back to full weight; an upstream that has never failed,
    /// or failed long ago, carries a recency of 1.0.
    pub fn weight(&self) -> f64 {
        let fails = self.fail_count.load(Ordering::Relaxed) as f64;
        let last_error = self.last_error_secs.load(Ordering::Relaxed);
        let recency = if last_error == 0 {
            1.0
        } else {
            let elapsed = Self::now_secs().saturating_sub(last_error) as f64;
            (elapsed / 300.0).min(1.0)
        };
        recency / (1.0 + fails)
    }
}

/// One remote resolver pinned to a single endpoint and transport.
pub struct UpstreamResolver {
    label: String,
    resolver: TokioAsyncResolver,
    pub health: UpstreamHealth,
}

impl UpstreamResolver {
    pub fn new(config: UpstreamEndpointConfig) -> Self {
        let label = config.label();
        let timeout = config.timeout;
        let try_tcp_on_error = matches!(config.transport, UpstreamTransport::Udp);
        let ns_config = config.into_resolver_config();

        let mut group = NameServerConfigGroup::new();
        group.push(ns_config);
        let resolver_config = ResolverConfig::from_parts(None, Vec::new(), group);

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        // On a truncated UDP response, hickory's connection itself retries
        // over TCP; this option additionally permits falling back to TCP on
        // transport-level errors, covering §4.3's "retries via TCP" rule for
        // UDP-configured upstreams.
        opts.try_tcp_on_error = try_tcp_on_error;
        opts.num_concurrent_reqs = 1;

        let resolver = TokioAsyncResolver::tokio(resolver_config, opts);

        Self {
            label,
            resolver,
            health: UpstreamHealth::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl ChainResolver for UpstreamResolver {
    fn type_tag(&self) -> &'static str {
        "upstream"
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        let query = request.question().clone();
        let lookup = self.resolver.lookup(query.name().clone(), query.query_type()).await;

        match lookup {
            Ok(lookup) => {
                self.health.record_success();
                let records: Vec<Record> = lookup.record_iter().cloned().collect();
                let response = Response::from_request(
                    request,
                    |message| {
                        for record in records {
                            message.add_answer(record);
                        }
                        message.set_response_code(ResponseCode::NoError);
                    },
                    ResponseType::Resolved,
                    format!("resolved via {}", self.label),
                );
                Ok(response)
            }
            Err(err) => match err.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                    self.health.record_success();
                    let code = *response_code;
                    Ok(Response::from_request(
                        request,
                        |message| {
                            message.set_response_code(code);
                        },
                        ResponseType::Resolved,
                        format!("{code} via {}", self.label),
                    ))
                }
                _ => {
                    self.health.record_error();
                    Err(CoreError::upstream(self.label.clone(), err.to_string()))
                }
            },
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
