//! Hard-coded RFC 6761/6303 special-use domain handling, per `spec.md`
//! §4.9.

use std::any::Any;
use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{RData, Record, RecordType};

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{canonical_name, Request, Response, ResponseType};

/// Reverse zones RFC 6303 recommends treating as private-use (never sent
/// upstream). `172.16/12`'s twelve second-octet labels are appended at
/// construction since they don't collapse into one literal suffix.
fn private_reverse_zones() -> Vec<String> {
    let mut zones = vec![
        "10.in-addr.arpa.".to_string(),
        "168.192.in-addr.arpa.".to_string(),
        "254.169.in-addr.arpa.".to_string(),
        "d.f.ip6.arpa.".to_string(),
        "8.b.d.0.1.0.0.2.ip6.arpa.".to_string(),
    ];
    for second_octet in 16..=31 {
        zones.push(format!("{second_octet}.172.in-addr.arpa."));
    }
    zones
}

pub struct SpecialUseResolver {
    next: ChainLink,
    private_reverse_zones: Vec<String>,
}

impl SpecialUseResolver {
    pub fn new(next: ChainLink) -> Self {
        Self {
            next,
            private_reverse_zones: private_reverse_zones(),
        }
    }

    fn matches_private_reverse_zone(&self, qname: &str) -> bool {
        self.private_reverse_zones.iter().any(|zone| qname == zone || qname.ends_with(&format!(".{zone}")))
    }
}

#[async_trait]
impl ChainResolver for SpecialUseResolver {
    fn type_tag(&self) -> &'static str {
        "special_use"
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        let qname = canonical_name(request.question().name());
        let qtype = request.question().query_type();

        let is_invalid = qname == "invalid." || qname.ends_with(".invalid.");
        let is_test = qname == "test." || qname.ends_with(".test.");

        if is_invalid || is_test || self.matches_private_reverse_zone(&qname) {
            return Ok(Response::from_request(
                request,
                |message| {
                    message.set_response_code(ResponseCode::NXDomain);
                },
                ResponseType::Special,
                "special-use domain",
            ));
        }

        if qname == "localhost." {
            return Ok(match qtype {
                RecordType::A => Response::from_request(
                    request,
                    |message| {
                        message.set_response_code(ResponseCode::NoError);
                        message.add_answer(Record::from_rdata(
                            request.question().name().clone(),
                            0,
                            RData::A(Ipv4Addr::LOCALHOST.into()),
                        ));
                    },
                    ResponseType::Special,
                    "localhost",
                ),
                RecordType::AAAA => Response::from_request(
                    request,
                    |message| {
                        message.set_response_code(ResponseCode::NoError);
                        message.add_answer(Record::from_rdata(
                            request.question().name().clone(),
                            0,
                            RData::AAAA(Ipv6Addr::LOCALHOST.into()),
                        ));
                    },
                    ResponseType::Special,
                    "localhost",
                ),
                _ => Response::from_request(
                    request,
                    |message| {
                        message.set_response_code(ResponseCode::NXDomain);
                    },
                    ResponseType::Special,
                    "localhost",
                ),
            });
        }

        self.next.resolve(request).await
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
    use hickory_proto::op::{Message, MessageType, OpCode, Query};
    use std::sync::Arc;

    fn query(name: &str, rtype: RecordType) -> Request {
        let mut message = Message::new();
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(hickory_proto::rr::Name::from_ascii(name).unwrap(), rtype));
        Request::new(message, "127.0.0.1:0".parse().unwrap(), Protocol::Udp)
    }

    fn resolver() -> SpecialUseResolver {
        SpecialUseResolver::new(Arc::new(NoOpResolver))
    }

    #[tokio::test]
    async fn localhost_a_query_returns_loopback() {
        let response = resolver().resolve(&mut query("localhost.", RecordType::A)).await.unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::NoError);
        match response.message.answers()[0].data() {
            Some(RData::A(addr)) => assert_eq!(*addr, Ipv4Addr::LOCALHOST.into()),
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[tokio::test]
    async fn localhost_aaaa_query_returns_loopback() {
        let response = resolver().resolve(&mut query("localhost.", RecordType::AAAA)).await.unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::NoError);
        match response.message.answers()[0].data() {
            Some(RData::AAAA(addr)) => assert_eq!(*addr, Ipv6Addr::LOCALHOST.into()),
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[tokio::test]
    async fn localhost_other_type_is_nxdomain() {
        let response = resolver().resolve(&mut query("localhost.", RecordType::TXT)).await.unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::NXDomain);
    }

    #[tokio::test]
    async fn dot_invalid_and_dot_test_are_nxdomain() {
        for name in ["foo.invalid.", "bar.test."] {
            let response = resolver().resolve(&mut query(name, RecordType::A)).await.unwrap();
            assert_eq!(response.message.response_code(), ResponseCode::NXDomain);
            assert_eq!(response.response_type, ResponseType::Special);
        }
    }

    #[tokio::test]
    async fn private_reverse_zone_is_nxdomain() {
        let response = resolver()
            .resolve(&mut query("1.10.in-addr.arpa.", RecordType::PTR))
            .await
            .unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::NXDomain);
    }

    #[tokio::test]
    async fn other_names_pass_through_to_next() {
        let response = resolver().resolve(&mut query("example.com.", RecordType::A)).await.unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::ServFail);
    }
}
