//! Rejects non-FQDN questions, per `spec.md` §4.9.

use std::any::Any;

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{canonical_name, Request, Response, ResponseType};

pub struct FqdnOnlyResolver {
    next: ChainLink,
    enabled: bool,
}

impl FqdnOnlyResolver {
    pub fn new(next: ChainLink, enabled: bool) -> Self {
        Self { next, enabled }
    }
}

#[async_trait]
impl ChainResolver for FqdnOnlyResolver {
    fn type_tag(&self) -> &'static str {
        "fqdn_only"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        if !self.enabled {
            return self.next.resolve(request).await;
        }

        let qname = canonical_name(request.question().name());
        if !qname.trim_end_matches('.').contains('.') {
            return Ok(Response::from_request(
                request,
                |message| {
                    message.set_response_code(ResponseCode::NXDomain);
                },
                ResponseType::NotFqdn,
                "NOTFQDN",
            ));
        }

        self.next.resolve(request).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
