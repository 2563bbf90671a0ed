//! Extended DNS Error attachment (RFC 8914), per `spec.md` §4.9.
//!
//! `hickory_proto`'s EDNS option set does not special-case EDE as its own
//! variant at this crate's pinned version, so the option is attached via
//! the generic `EdnsOption::Unknown` carrier using IANA option code 15, the
//! same mechanism a raw-wire implementation would use.

use std::any::Any;

use async_trait::async_trait;
use hickory_proto::op::Edns;
use hickory_proto::rr::rdata::opt::EdnsOption;

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{Request, Response, ResponseType};

const EDE_OPTION_CODE: u16 = 15;

fn info_code_for(response_type: ResponseType) -> u16 {
    match response_type {
        ResponseType::Blocked => 15,
        ResponseType::Filtered => 17,
        ResponseType::Resolved | ResponseType::Cached => 0,
        _ => 0,
    }
}

fn attach_ede(edns: &mut Edns, response_type: ResponseType, reason: &str) {
    let info_code = info_code_for(response_type);
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&info_code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    edns.options_mut().insert(EdnsOption::Unknown(EDE_OPTION_CODE, payload));
}

/// When enabled, attaches an EDE option describing why a non-RESOLVED
/// response took the shape it did.
pub struct EdeResolver {
    next: ChainLink,
    enabled: bool,
}

impl EdeResolver {
    pub fn new(next: ChainLink, enabled: bool) -> Self {
        Self { next, enabled }
    }
}

#[async_trait]
impl ChainResolver for EdeResolver {
    fn type_tag(&self) -> &'static str {
        "ede"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        let mut response = self.next.resolve(request).await?;
        if !self.enabled || response.response_type == ResponseType::Resolved {
            return Ok(response);
        }

        let mut edns = response.message.edns().cloned().unwrap_or_default();
        attach_ede(&mut edns, response.response_type, &response.reason);
        response.message.set_edns(edns);
        Ok(response)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
