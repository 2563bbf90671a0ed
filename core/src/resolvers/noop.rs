//! The terminal sentinel every chain ends at (Invariant 1).

use std::any::Any;

use async_trait::async_trait;

use crate::chain::ChainResolver;
use crate::error::Result;
use crate::model::{Request, Response, ResponseType};

/// A no-op tail resolver. Reaching it means every real stage declined to
/// answer, which should not happen in a correctly assembled chain (the
/// upstream-group selector is always the innermost real resolver), so it
/// answers SERVFAIL rather than panicking.
#[derive(Debug, Default)]
pub struct NoOpResolver;

#[async_trait]
impl ChainResolver for NoOpResolver {
    fn type_tag(&self) -> &'static str {
        "noop"
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        request
            .logger
            .warn("request reached the chain's no-op tail without an answer");
        Ok(Response::from_request(
            request,
            |message| message.set_response_code(hickory_proto::op::ResponseCode::ServFail),
            ResponseType::Resolved,
            "no resolver produced a response",
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
