//! Short-circuits configured query types with an empty NOERROR, per
//! `spec.md` §4.9.

use std::any::Any;
use std::collections::HashSet;

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{Request, Response, ResponseType};

pub struct FilteringResolver {
    next: ChainLink,
    query_types: HashSet<RecordType>,
}

impl FilteringResolver {
    pub fn new(next: ChainLink, query_types: HashSet<RecordType>) -> Self {
        Self { next, query_types }
    }
}

#[async_trait]
impl ChainResolver for FilteringResolver {
    fn type_tag(&self) -> &'static str {
        "filtering"
    }

    fn is_enabled(&self) -> bool {
        !self.query_types.is_empty()
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        if self.query_types.contains(&request.question().query_type()) {
            return Ok(Response::from_request(
                request,
                |message| {
                    message.set_response_code(ResponseCode::NoError);
                },
                ResponseType::Filtered,
                "FILTERED",
            ));
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
    use hickory_proto::rr::Name;
    use std::sync::Arc;

    fn query(rtype: RecordType) -> Request {
        let mut message = Message::new();
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(Name::from_ascii("example.com.").unwrap(), rtype));
        Request::new(message, "127.0.0.1:0".parse().unwrap(), Protocol::Udp)
    }

    #[tokio::test]
    async fn configured_type_short_circuits_with_empty_noerror() {
        let mut types = HashSet::new();
        types.insert(RecordType::HINFO);
        let resolver = FilteringResolver::new(Arc::new(NoOpResolver), types);

        let response = resolver.resolve(&mut query(RecordType::HINFO)).await.unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::NoError);
        assert_eq!(response.message.answer_count(), 0);
        assert_eq!(response.response_type, ResponseType::Filtered);
    }

    #[tokio::test]
    async fn unlisted_type_passes_through() {
        let mut types = HashSet::new();
        types.insert(RecordType::HINFO);
        let resolver = FilteringResolver::new(Arc::new(NoOpResolver), types);

        let response = resolver.resolve(&mut query(RecordType::A)).await.unwrap();
        assert_eq!(response.message.response_code(), ResponseCode::ServFail);
    }

    #[test]
    fn empty_type_set_disables_the_stage() {
        let resolver = FilteringResolver::new(Arc::new(NoOpResolver), HashSet::new());
        assert!(!resolver.is_enabled());
    }
}
