//! The rewriter wrapper described in `spec.md` §4.1: rewrites question
//! names by a suffix map before calling an inner resolver, rewrites answer
//! names back, and restores the original question before returning
//! (Invariant 2 explicitly carves this resolver out as the one node
//! allowed to mutate `Request.Req.Question` in place).

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::rr::Name;

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{Request, Response};

/// `{fromSuffix -> toSuffix}`, longest-suffix-first so overlapping rules
/// resolve deterministically.
#[derive(Debug, Clone)]
pub struct RewriteMap {
    rules: Vec<(String, String)>,
}

impl RewriteMap {
    pub fn new(mut rules: Vec<(String, String)>) -> Self {
        rules.sort_by_key(|(from, _)| std::cmp::Reverse(from.len()));
        Self { rules }
    }

    pub(crate) fn forward(&self, name: &str) -> Option<(String, usize)> {
        for (idx, (from, to)) in self.rules.iter().enumerate() {
            if name.ends_with(from.as_str()) {
                let prefix = &name[..name.len() - from.len()];
                return Some((format!("{prefix}{to}"), idx));
            }
        }
        None
    }

    pub(crate) fn backward(&self, name: &str, idx: usize) -> String {
        let (from, to) = &self.rules[idx];
        if let Some(prefix) = name.strip_suffix(to.as_str()) {
            format!("{prefix}{from}")
        } else {
            name.to_string()
        }
    }
}

/// Wraps an inner sub-chain (whose `next` terminates at the no-op
/// sentinel) and rewrites names crossing the wrapper boundary.
pub struct RewriterResolver {
    rewrites: RewriteMap,
    inner: ChainLink,
    /// If true and `inner` returns an empty answer, control passes to the
    /// outer chain's `next` rather than ending there.
    fallback_upstream: bool,
    next: Option<ChainLink>,
}

impl RewriterResolver {
    pub fn new(rewrites: RewriteMap, inner: ChainLink, fallback_upstream: bool) -> Self {
        Self {
            rewrites,
            inner,
            fallback_upstream,
            next: None,
        }
    }

    pub fn with_next(mut self, next: ChainLink) -> Self {
        self.next = Some(next);
        self
    }
}

#[async_trait]
impl ChainResolver for RewriterResolver {
    fn type_tag(&self) -> &'static str {
        "rewriter"
    }

    fn next(&self) -> Option<&ChainLink> {
        self.next.as_ref()
    }

    fn display_name(&self) -> String {
        format!("{} w/ rewrite", self.inner.type_tag())
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        let original_query = request.question().clone();
        let original_name = crate::model::canonical_name(original_query.name());

        let rewrite = self.rewrites.forward(&original_name);
        if let Some((rewritten, rule_idx)) = &rewrite {
            if let Ok(new_name) = Name::from_ascii(rewritten) {
                request.message.queries_mut()[0].set_name(new_name);
            }

            let mut response = self.inner.resolve(request).await?;

            // Invariant 2: restore the original question before returning.
            request.message.queries_mut()[0].set_name(original_query.name().clone());

            let answer_is_empty = response.message.answer_count() == 0;
            if self.fallback_upstream && answer_is_empty {
                if let Some(next) = &self.next {
                    return next.resolve(request).await;
                }
            }

            response.message.queries_mut()[0].set_name(original_query.name().clone());
            for record in response.message.answers_mut() {
                let rewritten_name = record.name().to_ascii();
                let restored = self.rewrites.backward(&rewritten_name, *rule_idx);
                if let Ok(name) = Name::from_ascii(&restored) {
                    record.set_name(name);
                }
            }
            return Ok(response);
        }

        self.inner.resolve(request).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;
    use crate::resolvers::noop::NoOpResolver;
    use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
    use hickory_proto::rr::{RData, Record, RecordType};
    use std::net::Ipv4Addr;

    struct StubInner {
        answer_ip: Option<Ipv4Addr>,
    }

    #[async_trait]
    impl ChainResolver for StubInner {
        fn type_tag(&self) -> &'static str {
            "stub-inner"
        }

        async fn resolve(&self, request: &mut Request) -> Result<Response> {
            let name = request.question().name().clone();
            let Some(ip) = self.answer_ip else {
                return Ok(Response::from_request(
                    request,
                    |message| message.set_response_code(ResponseCode::NoError),
                    crate::model::ResponseType::Resolved,
                    "empty",
                ));
            };
            Ok(Response::from_request(
                request,
                move |message| {
                    message.set_response_code(ResponseCode::NoError);
                    message.add_answer(Record::from_rdata(name, 300, RData::A(ip.into())));
                },
                crate::model::ResponseType::Resolved,
                "resolved",
            ))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn a_query(name: &str) -> Request {
        let mut message = Message::new();
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
        Request::new(message, "127.0.0.1:0".parse().unwrap(), Protocol::Udp)
    }

    #[tokio::test]
    async fn round_trip_rewrites_question_and_answer_names_back() {
        let inner = Arc::new(StubInner { answer_ip: Some(Ipv4Addr::new(1, 2, 3, 4)) });
        let rewrites = RewriteMap::new(vec![("internal.lan.".to_string(), "example.com.".to_string())]);
        let resolver = RewriterResolver::new(rewrites, inner, false);

        let mut request = a_query("host.internal.lan.");
        let response = resolver.resolve(&mut request).await.unwrap();

        assert_eq!(request.question().name().to_ascii(), "host.internal.lan.");
        assert_eq!(response.message.queries()[0].name().to_ascii(), "host.internal.lan.");
        let answer = &response.message.answers()[0];
        assert_eq!(answer.name().to_ascii(), "host.internal.lan.");
    }

    #[tokio::test]
    async fn fallback_upstream_on_empty_answer_delegates_to_outer_next() {
        let inner = Arc::new(StubInner { answer_ip: None });
        let rewrites = RewriteMap::new(vec![("internal.lan.".to_string(), "example.com.".to_string())]);
        let next: ChainLink = Arc::new(NoOpResolver);
        let resolver = RewriterResolver::new(rewrites, inner, true).with_next(next);

        let mut request = a_query("host.internal.lan.");
        let response = resolver.resolve(&mut request).await.unwrap();

        assert_eq!(response.message.response_code(), ResponseCode::ServFail);
    }

    #[tokio::test]
    async fn no_matching_suffix_passes_through_unrewritten() {
        let inner = Arc::new(StubInner { answer_ip: Some(Ipv4Addr::new(5, 6, 7, 8)) });
        let rewrites = RewriteMap::new(vec![("internal.lan.".to_string(), "example.com.".to_string())]);
        let resolver = RewriterResolver::new(rewrites, inner, false);

        let mut request = a_query("outside.net.");
        let response = resolver.resolve(&mut request).await.unwrap();
        assert_eq!(response.message.answers()[0].name().to_ascii(), "outside.net.");
    }
}
