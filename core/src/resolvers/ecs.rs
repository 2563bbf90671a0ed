//! EDNS Client Subnet handling, per `spec.md` §4.9.

use std::any::Any;
use std::net::IpAddr;

use async_trait::async_trait;
use hickory_proto::rr::rdata::opt::{ClientSubnet, EdnsOption};

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{Request, Response};

#[derive(Debug, Clone, Copy)]
pub struct EcsConfig {
    /// Source prefix length to attach for IPv4 client addresses, if any.
    pub ipv4_mask: Option<u8>,
    /// Source prefix length to attach for IPv6 client addresses, if any.
    pub ipv6_mask: Option<u8>,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self { ipv4_mask: None, ipv6_mask: None }
    }
}

/// Reads an inbound full-mask client-subnet option into
/// `Request.effective_client_ip`, or appends one to the forwarded query
/// built from the configured masks.
pub struct EcsResolver {
    next: ChainLink,
    config: EcsConfig,
}

impl EcsResolver {
    pub fn new(next: ChainLink, config: EcsConfig) -> Self {
        Self { next, config }
    }

    fn inbound_full_mask_subnet(request: &Request) -> Option<IpAddr> {
        let edns = request.message.edns()?;
        edns.options().iter().find_map(|(_, option)| match option {
            EdnsOption::Subnet(subnet) => {
                let full_mask = match subnet.addr() {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                if subnet.source_prefix() == full_mask {
                    Some(subnet.addr())
                } else {
                    None
                }
            }
            _ => None,
        })
    }

    fn outbound_subnet(&self, client_ip: IpAddr) -> Option<ClientSubnet> {
        match client_ip {
            IpAddr::V4(_) => self
                .config
                .ipv4_mask
                .map(|mask| ClientSubnet::new(client_ip, mask, 0)),
            IpAddr::V6(_) => self
                .config
                .ipv6_mask
                .map(|mask| ClientSubnet::new(client_ip, mask, 0)),
        }
    }
}

#[async_trait]
impl ChainResolver for EcsResolver {
    fn type_tag(&self) -> &'static str {
        "ecs"
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        if let Some(ip) = Self::inbound_full_mask_subnet(request) {
            request.effective_client_ip = Some(ip);
        } else if let Some(subnet) = self.outbound_subnet(request.effective_ip()) {
            let mut edns = request.message.edns().cloned().unwrap_or_default();
            edns.options_mut().insert(EdnsOption::Subnet(subnet));
            request.message.set_edns(edns);
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
    use hickory_proto::rr::{Name, RecordType};
    use std::sync::Arc;

    fn query() -> Request {
        let mut message = Message::new();
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(Name::from_ascii("example.com.").unwrap(), RecordType::A));
        Request::new(message, "203.0.113.9:0".parse().unwrap(), Protocol::Udp)
    }

    #[tokio::test]
    async fn full_mask_inbound_subnet_becomes_effective_client_ip() {
        let resolver = EcsResolver::new(Arc::new(NoOpResolver), EcsConfig::default());
        let mut request = query();
        let mut edns = hickory_proto::op::Edns::new();
        let subnet = ClientSubnet::new("198.51.100.4".parse::<IpAddr>().unwrap(), 32, 0);
        edns.options_mut().insert(EdnsOption::Subnet(subnet));
        request.message.set_edns(edns);

        resolver.resolve(&mut request).await.unwrap();
        assert_eq!(request.effective_client_ip, Some("198.51.100.4".parse().unwrap()));
    }

    #[tokio::test]
    async fn configured_mask_appends_outbound_subnet_option() {
        let config = EcsConfig { ipv4_mask: Some(24), ipv6_mask: None };
        let resolver = EcsResolver::new(Arc::new(NoOpResolver), config);
        let mut request = query();

        resolver.resolve(&mut request).await.unwrap();
        let edns = request.message.edns().expect("edns attached");
        let found = edns.options().iter().any(|(_, opt)| matches!(opt, EdnsOption::Subnet(s) if s.source_prefix() == 24));
        assert!(found);
    }

    #[tokio::test]
    async fn no_configured_mask_leaves_query_untouched() {
        let resolver = EcsResolver::new(Arc::new(NoOpResolver), EcsConfig::default());
        let mut request = query();

        resolver.resolve(&mut request).await.unwrap();
        assert!(request.message.edns().is_none());
    }
}
