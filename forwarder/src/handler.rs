//! Bridges `hickory_server`'s wire-level request/response handling to the
//! core resolution chain.
//!
//! Grounded in `shelter::commands::dns::DNSHandler`: a struct wrapping the
//! state needed to answer a query, implementing `hickory_server::server::RequestHandler`,
//! logging the inbound request before dispatch and mapping internal errors
//! to a SERVFAIL response rather than propagating a panic into the server
//! loop.

use std::net::SocketAddr;

use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, Message, MessageType, OpCode, ResponseCode};
use hickory_server::server::{Request as ServerRequest, RequestHandler, ResponseHandler, ResponseInfo};

use dns_forwarder_core::{ChainLink, Protocol as CoreProtocol, Request as CoreRequest};

/// Forwards every inbound query through the assembled chain and writes
/// whatever `Response` comes back onto the wire.
pub struct ForwarderHandler {
    pub chain: ChainLink,
}

impl ForwarderHandler {
    fn protocol_of(request: &ServerRequest) -> CoreProtocol {
        use hickory_proto::xfer::Protocol as WireProtocol;
        match request.protocol() {
            WireProtocol::Udp => CoreProtocol::Udp,
            WireProtocol::Tcp => CoreProtocol::Tcp,
            WireProtocol::Tls => CoreProtocol::Tls,
            WireProtocol::Https => CoreProtocol::Https,
            _ => CoreProtocol::Udp,
        }
    }

    /// Rebuilds a standalone `hickory_proto::op::Message` from the inbound
    /// wire request so it can travel through the chain independently of
    /// the server-owned borrow.
    fn inbound_message(request: &ServerRequest) -> Message {
        let mut message = Message::new();
        message.set_id(request.id());
        message.set_message_type(MessageType::Query);
        message.set_op_code(request.op_code());
        message.set_recursion_desired(request.recursion_desired());
        for query in request.queries() {
            message.add_query(query.original().clone());
        }
        if let Some(edns) = request.edns() {
            message.set_edns(edns.clone());
        }
        message
    }

    async fn process<R: ResponseHandler>(&self, request: &ServerRequest, mut response_handle: R) -> std::io::Result<ResponseInfo> {
        let client_addr: SocketAddr = request.src();

        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            let header = Header::response_from_request(request.header());
            let response = MessageResponseBuilder::from_message_request(request).error_msg(request.header(), ResponseCode::Refused);
            return response_handle.send_response(response).await.map(|_| ResponseInfo::from(header));
        }

        let message = Self::inbound_message(request);
        let mut core_request = CoreRequest::new(message, client_addr, Self::protocol_of(request));

        let outcome = self.chain.resolve(&mut core_request).await;

        let response_message = match outcome {
            Ok(response) => response.message,
            Err(err) => {
                core_request.logger.error(format_args!("chain resolution failed: {err}"));
                let mut message = hickory_server::proto::op::Message::new();
                message.set_id(request.id());
                message.add_query(
                    request
                        .queries()
                        .first()
                        .map(|q| q.original().clone())
                        .unwrap_or_default(),
                );
                message.set_message_type(MessageType::Response);
                message.set_op_code(OpCode::Query);
                message.set_response_code(ResponseCode::ServFail);
                message
            }
        };

        let mut header = Header::response_from_request(request.header());
        header.set_response_code(response_message.response_code());
        header.set_authentic_data(response_message.authentic_data());
        header.set_recursion_available(true);

        let builder = MessageResponseBuilder::from_message_request(request);
        let built = builder.build(
            header,
            response_message.answers().iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );

        match response_handle.send_response(built).await {
            Ok(info) => Ok(info),
            Err(_) => Ok(ResponseInfo::from(header)),
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for ForwarderHandler {
    async fn handle_request<R: ResponseHandler>(&self, request: &ServerRequest, response_handle: R) -> ResponseInfo {
        match self.process(request, response_handle).await {
            Ok(info) => info,
            Err(_) => {
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}
