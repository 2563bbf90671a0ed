//! The blocking resolver, per `spec.md` §4.5 — the most intricate stage,
//! implementing the forwarder's core block/allow policy.

pub mod groups;
pub mod matcher;
pub mod state;

use std::any::Any;
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{RData, Record, RecordType};

use crate::chain::{ChainLink, ChainResolver};
use crate::config::BlockType;
use crate::error::Result;
use crate::model::{Request, Response, ResponseType};
use crate::util::ClientMatcher;

pub use groups::{CompiledGroup, GroupSpec, ListSource, StaticListSource};
pub use state::{BlockingState, BlockingStatus};

#[derive(Debug, Clone)]
pub struct BlockingConfig {
    pub block_type: BlockType,
    pub block_ttl: Duration,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            block_type: BlockType::ZeroIp,
            block_ttl: Duration::from_secs(6 * 60 * 60),
        }
    }
}

pub struct BlockingResolver {
    next: ChainLink,
    groups: HashMap<String, CompiledGroup>,
    client_rules: Vec<(ClientMatcher, Vec<String>)>,
    default_groups: Vec<String>,
    pub state: BlockingState,
    config: BlockingConfig,
}

impl BlockingResolver {
    pub fn new(
        next: ChainLink,
        groups: HashMap<String, CompiledGroup>,
        client_rules: Vec<(ClientMatcher, Vec<String>)>,
        default_groups: Vec<String>,
        config: BlockingConfig,
        events: crate::events::EventBus,
    ) -> Self {
        let all_group_names = groups.keys().cloned().collect();
        Self {
            next,
            groups,
            client_rules,
            default_groups,
            state: BlockingState::new(all_group_names, events),
            config,
        }
    }

    /// Walks client identifiers against `clientGroupsBlock` and unions
    /// their targets, falling back to the `default` row when nothing
    /// matches. A resulting group name that itself looks like a FQDN only
    /// applies when the question name falls under it.
    fn applicable_groups(&self, request: &Request) -> Vec<String> {
        let identifiers = request.client_identifiers();
        let mut matched = Vec::new();
        for (matcher, targets) in &self.client_rules {
            let hit = matcher.matches_ip(request.effective_ip())
                || identifiers.iter().any(|id| matcher.matches_name(id));
            if hit {
                matched.extend(targets.iter().cloned());
            }
        }
        if matched.is_empty() {
            matched = self.default_groups.clone();
        }
        matched.sort();
        matched.dedup();

        let qname = crate::model::canonical_name(request.question().name());
        matched
            .into_iter()
            .filter(|group| match looks_like_fqdn(group) {
                true => qname == *group || qname.ends_with(&format!(".{group}")),
                false => true,
            })
            .collect()
    }

    fn is_allowlist_only(&self, group: &CompiledGroup) -> bool {
        group.denylist.entry_count() == 0 && group.allowlist.entry_count() > 0
    }

    fn matches_any_allowlist(&self, group_names: &[String], domain: &str) -> bool {
        group_names.iter().any(|name| {
            self.groups
                .get(name)
                .map(|g| g.allowlist.matching_domain_rule(domain).is_some())
                .unwrap_or(false)
        })
    }

    fn first_denylist_match(&self, group_names: &[String], domain: &str) -> Option<String> {
        group_names.iter().find(|name| {
            self.groups
                .get(*name)
                .map(|g| g.denylist.matching_domain_rule(domain).is_some())
                .unwrap_or(false)
        }).cloned()
    }

    fn first_ip_match(&self, group_names: &[String], message: &hickory_proto::op::Message) -> Option<String> {
        for name in group_names {
            let Some(group) = self.groups.get(name) else { continue };
            for record in message.answers() {
                let ip = match record.data() {
                    Some(RData::A(addr)) => Some(std::net::IpAddr::V4((*addr).into())),
                    Some(RData::AAAA(addr)) => Some(std::net::IpAddr::V6((*addr).into())),
                    _ => None,
                };
                if let Some(ip) = ip {
                    if group.denylist.matches_ip(ip) {
                        return Some(name.clone());
                    }
                }
            }
        }
        None
    }

    fn build_block_response(&self, request: &Request, reason: String) -> Response {
        let qtype = request.question().query_type();
        let ttl = self.config.block_ttl.as_secs().min(u32::MAX as u64) as u32;
        let name = request.question().name().clone();
        let block_type = self.config.block_type.clone();

        Response::from_request(
            request,
            |message| match block_type {
                BlockType::NxDomain => {
                    message.set_response_code(ResponseCode::NXDomain);
                }
                BlockType::ZeroIp => match qtype {
                    RecordType::A => {
                        message.set_response_code(ResponseCode::NoError);
                        message.add_answer(Record::from_rdata(name, ttl, RData::A(Ipv4Addr::UNSPECIFIED.into())));
                    }
                    RecordType::AAAA => {
                        message.set_response_code(ResponseCode::NoError);
                        message.add_answer(Record::from_rdata(name, ttl, RData::AAAA(Ipv6Addr::UNSPECIFIED.into())));
                    }
                    _ => {
                        message.set_response_code(ResponseCode::NXDomain);
                    }
                },
                BlockType::Literal { v4, v6 } => match qtype {
                    RecordType::A => {
                        message.set_response_code(ResponseCode::NoError);
                        let addr = v4.unwrap_or(Ipv4Addr::UNSPECIFIED);
                        message.add_answer(Record::from_rdata(name, ttl, RData::A(addr.into())));
                    }
                    RecordType::AAAA => {
                        message.set_response_code(ResponseCode::NoError);
                        let addr = v6.unwrap_or(Ipv6Addr::UNSPECIFIED);
                        message.add_answer(Record::from_rdata(name, ttl, RData::AAAA(addr.into())));
                    }
                    _ => {
                        message.set_response_code(ResponseCode::NXDomain);
                    }
                },
            },
            ResponseType::Blocked,
            reason,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use hickory_proto::op::{Message, MessageType, OpCode, Query};
    use hickory_proto::rr::Name;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn a_query(name: &str) -> Request {
        let mut message = Message::new();
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
        Request::new(message, "127.0.0.1:0".parse().unwrap(), crate::model::Protocol::Udp)
    }

    struct StubUpstream {
        calls: AtomicUsize,
        answer: Box<dyn Fn(&Request) -> Vec<Record> + Send + Sync>,
    }

    #[async_trait]
    impl ChainResolver for StubUpstream {
        fn type_tag(&self) -> &'static str {
            "stub-upstream"
        }

        async fn resolve(&self, request: &mut Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let records = (self.answer)(request);
            Ok(Response::from_request(
                request,
                |message| {
                    message.set_response_code(ResponseCode::NoError);
                    for record in records {
                        message.add_answer(record);
                    }
                },
                ResponseType::Resolved,
                "resolved",
            ))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn compiled_group(name: &str, deny_domains: &[&str], allow_domains: &[&str], deny_ips: &[&str], allow_ips: &[&str]) -> CompiledGroup {
        let deny_domains: Vec<String> = deny_domains.iter().map(|s| s.to_string()).collect();
        let allow_domains: Vec<String> = allow_domains.iter().map(|s| s.to_string()).collect();
        let deny_ips: Vec<String> = deny_ips.iter().map(|s| s.to_string()).collect();
        let allow_ips: Vec<String> = allow_ips.iter().map(|s| s.to_string()).collect();
        CompiledGroup {
            name: name.to_string(),
            denylist: matcher::CompiledList::compile(&deny_domains, &deny_ips),
            allowlist: matcher::CompiledList::compile(&allow_domains, &allow_ips),
        }
    }

    fn resolver_with(
        groups: HashMap<String, CompiledGroup>,
        upstream: Arc<StubUpstream>,
        config: BlockingConfig,
    ) -> BlockingResolver {
        BlockingResolver::new(
            upstream,
            groups,
            Vec::new(),
            vec!["default".to_string()],
            config,
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn denylist_blocks_plain_match() {
        let mut groups = HashMap::new();
        groups.insert("default".to_string(), compiled_group("default", &["ads.example.com"], &[], &[], &[]));
        let upstream = Arc::new(StubUpstream { calls: AtomicUsize::new(0), answer: Box::new(|_| Vec::new()) });
        let resolver = resolver_with(groups, upstream.clone(), BlockingConfig::default());

        let response = resolver.resolve(&mut a_query("ads.example.com.")).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Blocked);
        assert_eq!(response.reason, "BLOCKED (default)");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn denylist_wildcard_matches_canonical_trailing_dot_name() {
        let mut groups = HashMap::new();
        groups.insert("default".to_string(), compiled_group("default", &["*.ads.example.com"], &[], &[], &[]));
        let upstream = Arc::new(StubUpstream { calls: AtomicUsize::new(0), answer: Box::new(|_| Vec::new()) });
        let resolver = resolver_with(groups, upstream.clone(), BlockingConfig::default());

        let response = resolver.resolve(&mut a_query("track.ads.example.com.")).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Blocked);
        assert_eq!(response.reason, "BLOCKED (default)");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allowlist_wildcard_matches_canonical_trailing_dot_name() {
        let mut groups = HashMap::new();
        groups.insert(
            "default".to_string(),
            compiled_group("default", &["*.example.com"], &["*.example.com"], &[], &[]),
        );
        let upstream = Arc::new(StubUpstream { calls: AtomicUsize::new(0), answer: Box::new(|_| Vec::new()) });
        let resolver = resolver_with(groups, upstream.clone(), BlockingConfig::default());

        let response = resolver.resolve(&mut a_query("shop.example.com.")).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Resolved);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn allowlist_overrides_denylist_for_same_domain() {
        let mut groups = HashMap::new();
        groups.insert(
            "default".to_string(),
            compiled_group("default", &["example.com"], &["example.com"], &[], &[]),
        );
        let upstream = Arc::new(StubUpstream { calls: AtomicUsize::new(0), answer: Box::new(|_| Vec::new()) });
        let resolver = resolver_with(groups, upstream.clone(), BlockingConfig::default());

        let response = resolver.resolve(&mut a_query("example.com.")).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Resolved);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cname_chain_target_on_denylist_is_blocked() {
        let mut groups = HashMap::new();
        groups.insert("default".to_string(), compiled_group("default", &["tracker.example.net"], &[], &[], &[]));
        let upstream = Arc::new(StubUpstream {
            calls: AtomicUsize::new(0),
            answer: Box::new(|request| {
                let name = request.question().name().clone();
                vec![Record::from_rdata(
                    name,
                    300,
                    RData::CNAME(Name::from_ascii("tracker.example.net.").unwrap()),
                )]
            }),
        });
        let resolver = resolver_with(groups, upstream.clone(), BlockingConfig::default());

        let response = resolver.resolve(&mut a_query("shop.example.com.")).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Blocked);
        assert_eq!(response.reason, "BLOCKED CNAME (default)");
    }

    #[tokio::test]
    async fn answer_ip_on_denylist_is_blocked() {
        let mut groups = HashMap::new();
        groups.insert("default".to_string(), compiled_group("default", &[], &[], &["198.51.100.7"], &[]));
        let upstream = Arc::new(StubUpstream {
            calls: AtomicUsize::new(0),
            answer: Box::new(|request| {
                let name = request.question().name().clone();
                vec![Record::from_rdata(name, 300, RData::A(Ipv4Addr::new(198, 51, 100, 7).into()))]
            }),
        });
        let resolver = resolver_with(groups, upstream.clone(), BlockingConfig::default());

        let response = resolver.resolve(&mut a_query("example.org.")).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Blocked);
        assert_eq!(response.reason, "BLOCKED IP (default)");
    }

    #[tokio::test]
    async fn literal_block_type_answers_configured_addresses() {
        let mut groups = HashMap::new();
        groups.insert("default".to_string(), compiled_group("default", &["ads.example.com"], &[], &[], &[]));
        let upstream = Arc::new(StubUpstream { calls: AtomicUsize::new(0), answer: Box::new(|_| Vec::new()) });
        let config = BlockingConfig {
            block_type: BlockType::Literal {
                v4: Some(Ipv4Addr::new(10, 10, 10, 10)),
                v6: None,
            },
            block_ttl: Duration::from_secs(60),
        };
        let resolver = resolver_with(groups, upstream, config);

        let response = resolver.resolve(&mut a_query("ads.example.com.")).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Blocked);
        let answer = response.message.answers().first().expect("expected one answer");
        match answer.data() {
            Some(RData::A(addr)) => assert_eq!(Ipv4Addr::from(*addr), Ipv4Addr::new(10, 10, 10, 10)),
            other => panic!("expected an A record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabling_a_group_temporarily_passes_through_then_resumes() {
        let mut groups = HashMap::new();
        groups.insert("default".to_string(), compiled_group("default", &["ads.example.com"], &[], &[], &[]));
        let upstream = Arc::new(StubUpstream { calls: AtomicUsize::new(0), answer: Box::new(|_| Vec::new()) });
        let resolver = resolver_with(groups, upstream.clone(), BlockingConfig::default());

        let blocked = resolver.resolve(&mut a_query("ads.example.com.")).await.unwrap();
        assert_eq!(blocked.response_type, ResponseType::Blocked);

        resolver.state.disable(Duration::ZERO, vec!["default".to_string()]).unwrap();
        let passed = resolver.resolve(&mut a_query("ads.example.com.")).await.unwrap();
        assert_eq!(passed.response_type, ResponseType::Resolved);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);

        resolver.state.enable();
        let blocked_again = resolver.resolve(&mut a_query("ads.example.com.")).await.unwrap();
        assert_eq!(blocked_again.response_type, ResponseType::Blocked);
    }

    #[tokio::test]
    async fn disabling_unknown_group_is_an_error() {
        let groups = HashMap::new();
        let upstream = Arc::new(StubUpstream { calls: AtomicUsize::new(0), answer: Box::new(|_| Vec::new()) });
        let resolver = resolver_with(groups, upstream, BlockingConfig::default());

        let err = resolver.state.disable(Duration::from_secs(0), vec!["nonexistent".to_string()]);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn stale_reenable_timer_cannot_resurrect_a_later_disable() {
        let mut groups = HashMap::new();
        groups.insert("default".to_string(), compiled_group("default", &["ads.example.com"], &[], &[], &[]));
        let upstream = Arc::new(StubUpstream { calls: AtomicUsize::new(0), answer: Box::new(|_| Vec::new()) });
        let resolver = resolver_with(groups, upstream, BlockingConfig::default());

        // First, a short timed disable schedules a re-enable.
        resolver.state.disable(Duration::from_millis(10), vec!["default".to_string()]).unwrap();
        // Before that timer fires, a second, indefinite disable supersedes it.
        resolver.state.disable(Duration::ZERO, vec!["default".to_string()]).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!resolver.state.is_group_enabled("default"));
    }
}

fn looks_like_fqdn(group: &str) -> bool {
    group.contains('.')
}

fn cname_targets(message: &hickory_proto::op::Message) -> Vec<String> {
    message
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            Some(RData::CNAME(target)) => Some(crate::model::canonical_name(target)),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl ChainResolver for BlockingResolver {
    fn type_tag(&self) -> &'static str {
        "blocking"
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        let groups = self.applicable_groups(request);

        if groups.iter().all(|g| !self.state.is_group_enabled(g)) {
            return self.next.resolve(request).await;
        }
        let groups: Vec<String> = groups.into_iter().filter(|g| self.state.is_group_enabled(g)).collect();

        let qname = crate::model::canonical_name(request.question().name());

        let allow_only_groups: Vec<String> = groups
            .iter()
            .filter(|name| self.groups.get(*name).map(|g| self.is_allowlist_only(g)).unwrap_or(false))
            .cloned()
            .collect();

        if !allow_only_groups.is_empty() && !self.matches_any_allowlist(&allow_only_groups, &qname) {
            return Ok(self.build_block_response(request, "BLOCKED (ALLOWLIST ONLY)".to_string()));
        }

        if self.matches_any_allowlist(&groups, &qname) {
            return self.next.resolve(request).await;
        }

        if let Some(group) = self.first_denylist_match(&groups, &qname) {
            return Ok(self.build_block_response(request, format!("BLOCKED ({group})")));
        }

        let response = self.next.resolve(request).await?;

        if let Some(group) = self.first_ip_match(&groups, &response.message) {
            return Ok(self.build_block_response(request, format!("BLOCKED IP ({group})")));
        }

        let targets = cname_targets(&response.message);
        if !targets.is_empty() {
            if targets.iter().any(|t| self.matches_any_allowlist(&groups, t)) {
                return Ok(response);
            }
            for target in &targets {
                if let Some(group) = self.first_denylist_match(&groups, target) {
                    return Ok(self.build_block_response(request, format!("BLOCKED CNAME ({group})")));
                }
            }
        }

        Ok(response)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
