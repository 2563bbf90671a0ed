//! DNS64 synthesis, per `spec.md` §4.7 (RFC 6147/6052).

use std::any::Any;
use std::net::{IpAddr, Ipv6Addr};

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{DNSClass, RData, Record, RecordType};

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{Request, Response, ResponseType};
use crate::util::{cidr_contains, rfc6052_embed};

#[derive(Debug, Clone)]
pub struct Dns64Config {
    pub prefixes: Vec<(Ipv6Addr, u8)>,
    exclusion_ranges: Vec<(IpAddr, u8)>,
}

impl Dns64Config {
    pub fn new(prefixes: Vec<(Ipv6Addr, u8)>) -> Self {
        let mut exclusion_ranges = vec![
            (IpAddr::V6("::ffff:0:0".parse().unwrap()), 96),
            (IpAddr::V6(Ipv6Addr::LOCALHOST), 128),
            (IpAddr::V6("fe80::".parse().unwrap()), 10),
            (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 128),
        ];
        for (prefix, len) in &prefixes {
            exclusion_ranges.push((IpAddr::V6(*prefix), *len));
        }
        Self { prefixes, exclusion_ranges }
    }

    fn is_excluded(&self, addr: Ipv6Addr) -> bool {
        self.exclusion_ranges
            .iter()
            .any(|(base, len)| cidr_contains(*base, *len, IpAddr::V6(addr)))
    }
}

pub struct Dns64Resolver {
    next: ChainLink,
    config: Dns64Config,
}

impl Dns64Resolver {
    pub fn new(next: ChainLink, config: Dns64Config) -> Self {
        Self { next, config }
    }
}

#[async_trait]
impl ChainResolver for Dns64Resolver {
    fn type_tag(&self) -> &'static str {
        "dns64"
    }

    fn is_enabled(&self) -> bool {
        !self.config.prefixes.is_empty()
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        let question = request.question().clone();
        if !self.is_enabled() || question.query_type() != RecordType::AAAA || question.query_class() != DNSClass::IN {
            return self.next.resolve(request).await;
        }

        let aaaa_response = self.next.resolve(request).await?;

        let needs_synthesis = aaaa_response
            .message
            .answers()
            .iter()
            .filter(|r| r.record_type() == RecordType::AAAA)
            .all(|r| match r.data() {
                Some(RData::AAAA(addr)) => self.config.is_excluded((*addr).into()),
                _ => false,
            });
        if !needs_synthesis {
            return Ok(aaaa_response);
        }

        let mut a_request = request.clone();
        a_request.message.queries_mut()[0].set_query_type(RecordType::A);
        let a_response = self.next.resolve(&mut a_request).await?;

        if a_response.message.response_code() == ResponseCode::NXDomain {
            return Ok(Response::from_request(
                request,
                |message| {
                    message.set_response_code(ResponseCode::NXDomain);
                },
                ResponseType::Resolved,
                "NXDOMAIN",
            ));
        }
        if a_response.message.response_code() != ResponseCode::NoError {
            return Ok(aaaa_response);
        }

        let a_records: Vec<&Record> = a_response
            .message
            .answers()
            .iter()
            .filter(|r| r.record_type() == RecordType::A)
            .collect();
        if a_records.is_empty() {
            return Ok(aaaa_response);
        }

        let min_ttl = a_response.message.answers().iter().map(Record::ttl).min().unwrap_or(0);

        let mut synthesized = Vec::new();
        for record in &a_records {
            if let Some(RData::A(v4)) = record.data() {
                for (prefix, len) in &self.config.prefixes {
                    if let Some(v6) = rfc6052_embed(*prefix, *len, (*v4).into()) {
                        synthesized.push(Record::from_rdata(record.name().clone(), min_ttl, RData::AAAA(v6.into())));
                    }
                }
            }
        }

        let preserved: Vec<Record> = a_response
            .message
            .answers()
            .iter()
            .filter(|r| matches!(r.record_type(), RecordType::CNAME | RecordType::DNAME))
            .cloned()
            .collect();
        let additionals: Vec<Record> = a_response.message.additionals().to_vec();
        let authoritative = a_response.message.authoritative();
        let recursion_available = a_response.message.recursion_available();

        Ok(Response::from_request(
            request,
            |message| {
                for record in preserved {
                    message.add_answer(record);
                }
                for record in synthesized {
                    message.add_answer(record);
                }
                for record in additionals {
                    message.add_additional(record);
                }
                message.set_authoritative(authoritative);
                message.set_recursion_available(recursion_available);
                message.set_response_code(ResponseCode::NoError);
                // Non-validating mode: AD is never set on a synthesized answer.
                message.set_authentic_data(false);
            },
            ResponseType::Synthesized,
            "DNS64 synthesis",
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;
    use hickory_proto::op::{Message, MessageType, OpCode, Query};
    use hickory_proto::rr::Name;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    struct StubUpstream;

    #[async_trait]
    impl ChainResolver for StubUpstream {
        fn type_tag(&self) -> &'static str {
            "stub-upstream"
        }

        async fn resolve(&self, request: &mut Request) -> Result<Response> {
            let question = request.question().clone();
            let name = question.name().clone();
            Ok(Response::from_request(
                request,
                |message| {
                    message.set_response_code(ResponseCode::NoError);
                    match question.query_type() {
                        RecordType::A => {
                            message.add_answer(Record::from_rdata(name, 300, RData::A(Ipv4Addr::new(93, 184, 216, 34).into())));
                        }
                        RecordType::AAAA => {}
                        _ => {}
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

    fn aaaa_query(name: &str) -> Request {
        let mut message = Message::new();
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::AAAA));
        Request::new(message, "127.0.0.1:0".parse().unwrap(), Protocol::Udp)
    }

    #[tokio::test]
    async fn synthesizes_aaaa_from_a_when_no_native_aaaa_exists() {
        let upstream: ChainLink = Arc::new(StubUpstream);
        let config = Dns64Config::new(vec![("64:ff9b::".parse().unwrap(), 96)]);
        let resolver = Dns64Resolver::new(upstream, config);

        let response = resolver.resolve(&mut aaaa_query("example.com.")).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Synthesized);

        let answer = response
            .message
            .answers()
            .iter()
            .find(|r| r.record_type() == RecordType::AAAA)
            .expect("expected a synthesized AAAA answer");
        match answer.data() {
            Some(RData::AAAA(addr)) => {
                let v6 = Ipv6Addr::from(*addr);
                assert_eq!(v6.segments()[0], 0x0064);
                assert_eq!(v6.segments()[1], 0xff9b);
            }
            other => panic!("expected an AAAA record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_without_prefixes_forwards_unchanged() {
        let upstream: ChainLink = Arc::new(StubUpstream);
        let config = Dns64Config::new(Vec::new());
        let resolver = Dns64Resolver::new(upstream, config);

        assert!(!resolver.is_enabled());
        let response = resolver.resolve(&mut aaaa_query("example.com.")).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Resolved);
        assert!(response.message.answers().iter().all(|r| r.record_type() != RecordType::AAAA));
    }
}
