//! The request/response data model shared by every resolver in the chain.
//!
//! Grounded in `spec.md` §3. Wire messages are represented with
//! `hickory_proto::op::Message`, the same crate the teacher crate uses for
//! its DNS server handler (`shelter::commands::dns`), so every resolver can
//! inspect and rewrite questions/answers with real RFC 1035 semantics
//! instead of a hand-rolled wire format.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use hickory_proto::op::Message;
use hickory_proto::rr::{Name, RecordType};
use tokio_util::sync::CancellationToken;

use crate::logging::RequestLogger;

/// Transport the query arrived over. Listener plumbing for these is out of
/// scope for the core (`spec.md` §1); the tag is still carried so stages
/// like the upstream selector and EDNS-buffer sizing can make
/// transport-aware decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
    Tls,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
            Protocol::Tls => "tls",
            Protocol::Https => "https",
        };
        write!(f, "{s}")
    }
}

/// Tags a [`Response`] with the stage that produced it, for logging and for
/// mapping onto Extended DNS Errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Resolved,
    Cached,
    Blocked,
    CustomDns,
    Conditional,
    Filtered,
    NotFqdn,
    Special,
    Synthesized,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Resolved => "RESOLVED",
            ResponseType::Cached => "CACHED",
            ResponseType::Blocked => "BLOCKED",
            ResponseType::CustomDns => "CUSTOMDNS",
            ResponseType::Conditional => "CONDITIONAL",
            ResponseType::Filtered => "FILTERED",
            ResponseType::NotFqdn => "NOTFQDN",
            ResponseType::Special => "SPECIAL",
            ResponseType::Synthesized => "SYNTHESIZED",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One inbound query. Immutable per call except for the rewriter resolver,
/// which restores the original question before returning (Invariant 2).
#[derive(Clone)]
pub struct Request {
    pub message: Message,
    pub client_addr: SocketAddr,
    pub client_id: Option<String>,
    pub client_names: Option<Vec<String>>,
    pub protocol: Protocol,
    pub logger: RequestLogger,
    pub cancellation: CancellationToken,
    /// Set by the ECS resolver when the request carries an EDNS
    /// client-subnet option with a full-length mask; other stages that
    /// key decisions on client identity (blocking, client-names,
    /// upstream-group selection) should prefer this over `client_addr`
    /// when present.
    pub effective_client_ip: Option<IpAddr>,
}

impl Request {
    pub fn new(message: Message, client_addr: SocketAddr, protocol: Protocol) -> Self {
        let logger = RequestLogger::for_request(&message, client_addr);
        Self {
            message,
            client_addr,
            client_id: None,
            client_names: None,
            protocol,
            logger,
            cancellation: CancellationToken::new(),
            effective_client_ip: None,
        }
    }

    /// The client address stages should match against: the ECS-supplied
    /// address when present, otherwise the transport-level source.
    pub fn effective_ip(&self) -> IpAddr {
        self.effective_client_ip.unwrap_or_else(|| self.client_addr.ip())
    }

    /// The single question carried by this request, per §3 ("one question
    /// in practice"). Panics only if a caller bypassed normal construction
    /// and built a request with zero questions, which no resolver does.
    pub fn question(&self) -> &hickory_proto::op::Query {
        &self.message.queries()[0]
    }

    pub fn fingerprint(&self) -> QuestionFingerprint {
        QuestionFingerprint::from_query(self.question())
    }

    /// Client identifiers considered when matching against group/upstream
    /// selectors, in the precedence order callers should try them: the
    /// out-of-band client id first, then any resolved client names, then
    /// falling back to the bare IP.
    pub fn client_identifiers(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(id) = &self.client_id {
            ids.push(id.clone());
        }
        if let Some(names) = &self.client_names {
            ids.extend(names.iter().cloned());
        }
        ids.push(self.effective_ip().to_string());
        ids
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// A DNS message plus the pipeline metadata attached to it.
#[derive(Clone)]
pub struct Response {
    pub message: Message,
    pub response_type: ResponseType,
    pub reason: String,
}

impl Response {
    pub fn new(message: Message, response_type: ResponseType, reason: impl Into<String>) -> Self {
        Self {
            message,
            response_type,
            reason: reason.into(),
        }
    }

    /// Builds a response whose header/id/question section are copied from
    /// `request`, satisfying Invariant 3 unconditionally.
    pub fn from_request(
        request: &Request,
        build: impl FnOnce(&mut Message),
        response_type: ResponseType,
        reason: impl Into<String>,
    ) -> Self {
        let mut message = Message::new();
        message.set_id(request.message.id());
        message.add_query(request.question().clone());
        message.set_message_type(hickory_proto::op::MessageType::Response);
        message.set_op_code(request.message.op_code());
        message.set_recursion_desired(request.message.recursion_desired());
        message.set_recursion_available(true);
        build(&mut message);
        Self::new(message, response_type, reason)
    }
}

/// `(qtype, lowercased qname)` — keys the caches and answer-equality
/// checks. The canonical form is lowercase with a trailing dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestionFingerprint {
    pub qtype: RecordType,
    pub qname: String,
}

impl QuestionFingerprint {
    pub fn new(qtype: RecordType, qname: &Name) -> Self {
        Self {
            qtype,
            qname: canonical_name(qname),
        }
    }

    pub fn from_query(query: &hickory_proto::op::Query) -> Self {
        Self::new(query.query_type(), query.name())
    }
}

/// Lowercases and ensures a trailing dot, matching §3's canonical form.
pub fn canonical_name(name: &Name) -> String {
    let mut s = name.to_ascii().to_lowercase();
    if !s.ends_with('.') {
        s.push('.');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType, OpCode, Query};

    fn request(name: &str, client: &str) -> Request {
        let mut message = Message::new();
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
        Request::new(message, format!("{client}:0").parse().unwrap(), Protocol::Udp)
    }

    #[test]
    fn canonical_name_is_lowercase_with_trailing_dot() {
        let name = Name::from_ascii("Example.COM").unwrap();
        assert_eq!(canonical_name(&name), "example.com.");
    }

    #[test]
    fn fingerprint_is_case_insensitive() {
        let a = request("Example.COM.", "127.0.0.1");
        let b = request("example.com.", "127.0.0.1");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn effective_ip_prefers_ecs_over_transport_source() {
        let mut req = request("example.com.", "192.0.2.1");
        assert_eq!(req.effective_ip(), "192.0.2.1".parse::<IpAddr>().unwrap());
        req.effective_client_ip = Some("198.51.100.4".parse().unwrap());
        assert_eq!(req.effective_ip(), "198.51.100.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn client_identifiers_prefer_client_id_then_names_then_ip() {
        let mut req = request("example.com.", "192.0.2.1");
        assert_eq!(req.client_identifiers(), vec!["192.0.2.1".to_string()]);

        req.client_names = Some(vec!["host.lan.".to_string()]);
        assert_eq!(req.client_identifiers(), vec!["host.lan.".to_string(), "192.0.2.1".to_string()]);

        req.client_id = Some("explicit-id".to_string());
        assert_eq!(
            req.client_identifiers(),
            vec!["explicit-id".to_string(), "host.lan.".to_string(), "192.0.2.1".to_string()]
        );
    }

    #[test]
    fn response_from_request_copies_id_and_question() {
        let req = request("example.com.", "127.0.0.1");
        let response = Response::from_request(
            &req,
            |message| message.set_response_code(hickory_proto::op::ResponseCode::NoError),
            ResponseType::Resolved,
            "ok",
        );
        assert_eq!(response.message.id(), req.message.id());
        assert_eq!(response.message.queries()[0].name(), req.question().name());
    }
}
