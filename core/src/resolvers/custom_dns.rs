//! Custom DNS: a static domain -> RR-list map with reverse lookup and CNAME
//! chasing, per `spec.md` §4.6.

use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Name, RData, Record, RecordType};

use crate::chain::{ChainLink, ChainResolver};
use crate::error::{CoreError, Result};
use crate::model::{canonical_name, Request, Response, ResponseType};

#[derive(Debug, Clone)]
pub struct CustomDnsEntry {
    pub rtype: RecordType,
    pub rdata: RData,
    pub ttl: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CustomDnsConfig {
    pub filter_unmapped_types: bool,
}

pub struct CustomDnsResolver {
    next: ChainLink,
    forward: HashMap<String, Vec<CustomDnsEntry>>,
    reverse: HashMap<IpAddr, Vec<String>>,
    config: CustomDnsConfig,
}

impl CustomDnsResolver {
    pub fn new(
        next: ChainLink,
        forward: HashMap<String, Vec<CustomDnsEntry>>,
        reverse: HashMap<IpAddr, Vec<String>>,
        config: CustomDnsConfig,
    ) -> Self {
        Self {
            next,
            forward: forward
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            reverse,
            config,
        }
    }

    fn find_entry(&self, qname: &str) -> Option<&Vec<CustomDnsEntry>> {
        let mut current = qname;
        loop {
            if let Some(entries) = self.forward.get(current) {
                return Some(entries);
            }
            match strip_leftmost_label(current) {
                Some(rest) => current = rest,
                None => return None,
            }
        }
    }

    /// Walks the question name toward the root; the first matching domain
    /// produces an answer of all RRs of the question type. A CNAME entry
    /// satisfies any question type and is chased iteratively, with loop
    /// detection over previously visited target names.
    fn resolve_chain(&self, initial_qname: &str, qtype: RecordType) -> Result<(bool, Vec<Record>)> {
        let mut visited = Vec::new();
        let mut current = initial_qname.to_string();
        let mut records = Vec::new();
        let mut domain_known = false;

        loop {
            if visited.contains(&current) {
                return Err(CoreError::operational(
                    "custom_dns",
                    format!("CNAME loop detected at {current}"),
                ));
            }
            visited.push(current.clone());

            let Some(entries) = self.find_entry(&current) else {
                break;
            };
            domain_known = true;

            let direct: Vec<&CustomDnsEntry> = entries.iter().filter(|e| e.rtype == qtype).collect();
            if !direct.is_empty() {
                for entry in direct {
                    records.push(build_record(&current, entry));
                }
                break;
            }

            if qtype != RecordType::CNAME {
                if let Some(cname_entry) = entries.iter().find(|e| e.rtype == RecordType::CNAME) {
                    records.push(build_record(&current, cname_entry));
                    if let RData::CNAME(target) = &cname_entry.rdata {
                        current = canonical_name(target);
                        continue;
                    }
                }
            }
            break;
        }

        Ok((domain_known, records))
    }
}

fn strip_leftmost_label(name: &str) -> Option<&str> {
    let trimmed = name.trim_end_matches('.');
    let rest = trimmed.split_once('.')?.1;
    Some(rest)
}

fn build_record(name: &str, entry: &CustomDnsEntry) -> Record {
    let name = Name::from_ascii(name).unwrap_or_else(|_| Name::root());
    Record::from_rdata(name, entry.ttl, entry.rdata.clone())
}

fn parse_ptr_name(qname: &str) -> Option<IpAddr> {
    let trimmed = qname.trim_end_matches('.');
    if let Some(prefix) = trimmed.strip_suffix(".in-addr.arpa") {
        let octets: Vec<&str> = prefix.split('.').collect();
        if octets.len() != 4 {
            return None;
        }
        let mut bytes = [0u8; 4];
        for (i, octet) in octets.iter().rev().enumerate() {
            bytes[i] = octet.parse().ok()?;
        }
        return Some(IpAddr::V4(Ipv4Addr::from(bytes)));
    }
    if let Some(prefix) = trimmed.strip_suffix(".ip6.arpa") {
        let nibbles: Vec<&str> = prefix.split('.').collect();
        if nibbles.len() != 32 {
            return None;
        }
        let hex: String = nibbles.iter().rev().cloned().collect();
        let mut bytes = [0u8; 16];
        for i in 0..16 {
            bytes[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        return Some(IpAddr::V6(Ipv6Addr::from(bytes)));
    }
    None
}

#[async_trait]
impl ChainResolver for CustomDnsResolver {
    fn type_tag(&self) -> &'static str {
        "custom_dns"
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        let qname = canonical_name(request.question().name());
        let qtype = request.question().query_type();

        if qtype == RecordType::PTR {
            if let Some(ip) = parse_ptr_name(&qname) {
                if let Some(names) = self.reverse.get(&ip) {
                    let names = names.clone();
                    return Ok(Response::from_request(
                        request,
                        |message| {
                            for name in &names {
                                if let Ok(n) = Name::from_ascii(name) {
                                    message.add_answer(Record::from_rdata(
                                        request_name_clone(message),
                                        3600,
                                        RData::PTR(n),
                                    ));
                                }
                            }
                            message.set_response_code(ResponseCode::NoError);
                        },
                        ResponseType::CustomDns,
                        "custom DNS reverse lookup",
                    ));
                }
            }
        }

        let (domain_known, records) = self.resolve_chain(&qname, qtype)?;

        if !records.is_empty() {
            return Ok(Response::from_request(
                request,
                |message| {
                    for record in records {
                        message.add_answer(record);
                    }
                    message.set_response_code(ResponseCode::NoError);
                },
                ResponseType::CustomDns,
                "custom DNS mapping",
            ));
        }

        if domain_known && self.config.filter_unmapped_types {
            return Ok(Response::from_request(
                request,
                |message| {
                    message.set_response_code(ResponseCode::NoError);
                },
                ResponseType::CustomDns,
                "custom DNS: no record of the requested type",
            ));
        }

        self.next.resolve(request).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn request_name_clone(message: &hickory_proto::op::Message) -> Name {
    message
        .queries()
        .first()
        .map(|q| q.name().clone())
        .unwrap_or_else(Name::root)
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
        message.add_query(Query::query(Name::from_ascii(name).unwrap(), rtype));
        Request::new(message, "127.0.0.1:0".parse().unwrap(), Protocol::Udp)
    }

    #[tokio::test]
    async fn direct_a_record_answers_without_delegating() {
        let mut forward = HashMap::new();
        forward.insert(
            "home.lan.".to_string(),
            vec![CustomDnsEntry {
                rtype: RecordType::A,
                rdata: RData::A(Ipv4Addr::new(192, 168, 1, 10).into()),
                ttl: 60,
            }],
        );
        let resolver = CustomDnsResolver::new(
            Arc::new(NoOpResolver),
            forward,
            HashMap::new(),
            CustomDnsConfig::default(),
        );

        let response = resolver.resolve(&mut query("home.lan.", RecordType::A)).await.unwrap();
        assert_eq!(response.response_type, ResponseType::CustomDns);
        assert_eq!(response.message.answer_count(), 1);
    }

    #[tokio::test]
    async fn cname_chase_follows_into_another_mapped_domain() {
        let mut forward = HashMap::new();
        forward.insert(
            "alias.lan.".to_string(),
            vec![CustomDnsEntry {
                rtype: RecordType::CNAME,
                rdata: RData::CNAME(Name::from_ascii("target.lan.").unwrap()),
                ttl: 60,
            }],
        );
        forward.insert(
            "target.lan.".to_string(),
            vec![CustomDnsEntry {
                rtype: RecordType::A,
                rdata: RData::A(Ipv4Addr::new(10, 0, 0, 1).into()),
                ttl: 60,
            }],
        );
        let resolver = CustomDnsResolver::new(
            Arc::new(NoOpResolver),
            forward,
            HashMap::new(),
            CustomDnsConfig::default(),
        );

        let response = resolver.resolve(&mut query("alias.lan.", RecordType::A)).await.unwrap();
        assert_eq!(response.message.answer_count(), 2);
    }

    #[tokio::test]
    async fn cname_loop_fails_instead_of_hanging() {
        let mut forward = HashMap::new();
        forward.insert(
            "a.lan.".to_string(),
            vec![CustomDnsEntry {
                rtype: RecordType::CNAME,
                rdata: RData::CNAME(Name::from_ascii("b.lan.").unwrap()),
                ttl: 60,
            }],
        );
        forward.insert(
            "b.lan.".to_string(),
            vec![CustomDnsEntry {
                rtype: RecordType::CNAME,
                rdata: RData::CNAME(Name::from_ascii("a.lan.").unwrap()),
                ttl: 60,
            }],
        );
        let resolver = CustomDnsResolver::new(
            Arc::new(NoOpResolver),
            forward,
            HashMap::new(),
            CustomDnsConfig::default(),
        );

        let result = resolver.resolve(&mut query("a.lan.", RecordType::A)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unmapped_type_under_known_domain_returns_empty_noerror_when_configured() {
        let mut forward = HashMap::new();
        forward.insert(
            "home.lan.".to_string(),
            vec![CustomDnsEntry {
                rtype: RecordType::A,
                rdata: RData::A(Ipv4Addr::new(192, 168, 1, 10).into()),
                ttl: 60,
            }],
        );
        let resolver = CustomDnsResolver::new(
            Arc::new(NoOpResolver),
            forward,
            HashMap::new(),
            CustomDnsConfig { filter_unmapped_types: true },
        );

        let response = resolver.resolve(&mut query("home.lan.", RecordType::AAAA)).await.unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::NoError);
        assert_eq!(response.message.answer_count(), 0);
    }

    #[tokio::test]
    async fn ptr_query_synthesizes_from_reverse_map() {
        let mut reverse = HashMap::new();
        reverse.insert(
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            vec!["home.lan.".to_string()],
        );
        let resolver = CustomDnsResolver::new(
            Arc::new(NoOpResolver),
            HashMap::new(),
            reverse,
            CustomDnsConfig::default(),
        );

        let response = resolver
            .resolve(&mut query("10.1.168.192.in-addr.arpa.", RecordType::PTR))
            .await
            .unwrap();
        assert_eq!(response.response_type, ResponseType::CustomDns);
        assert_eq!(response.message.answer_count(), 1);
    }

    #[tokio::test]
    async fn unknown_domain_delegates_to_next() {
        let resolver = CustomDnsResolver::new(
            Arc::new(NoOpResolver),
            HashMap::new(),
            HashMap::new(),
            CustomDnsConfig::default(),
        );

        let response = resolver.resolve(&mut query("elsewhere.net.", RecordType::A)).await.unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::ServFail);
    }
}
