//! Per-request logging handle.
//!
//! The teacher crate logs with bare `log::info!`/`log::error!` calls
//! scattered through each handler (`shelter::commands::dns::DNSHandler`,
//! `shelter::event_handler`). That's fine for a single-shot exfiltration
//! handler; a resolution pipeline fans a query out across many stages, so
//! `spec.md` §3 calls for a logger handle carried on the `Request` that
//! every stage can use without re-deriving the client/question context.

use std::fmt;
use std::net::SocketAddr;

use hickory_proto::op::Message;

/// A small, cheaply-cloned logging context carried on every `Request`.
///
/// Every resolver logs through this instead of bare `log::` macros so a
/// single query's log lines stay correlated (same client, same qname) even
/// as it travels through a dozen stages.
#[derive(Clone)]
pub struct RequestLogger {
    client: SocketAddr,
    qname: String,
    qtype: String,
}

impl RequestLogger {
    pub fn for_request(message: &Message, client: SocketAddr) -> Self {
        let (qname, qtype) = message
            .queries()
            .first()
            .map(|q| (q.name().to_string(), q.query_type().to_string()))
            .unwrap_or_else(|| ("<none>".to_string(), "<none>".to_string()));
        Self {
            client,
            qname,
            qtype,
        }
    }

    pub fn info(&self, msg: impl fmt::Display) {
        log::info!("[{} {} {}] {}", self.client, self.qtype, self.qname, msg);
    }

    pub fn warn(&self, msg: impl fmt::Display) {
        log::warn!("[{} {} {}] {}", self.client, self.qtype, self.qname, msg);
    }

    pub fn error(&self, msg: impl fmt::Display) {
        log::error!("[{} {} {}] {}", self.client, self.qtype, self.qname, msg);
    }

    pub fn debug(&self, msg: impl fmt::Display) {
        log::debug!("[{} {} {}] {}", self.client, self.qtype, self.qname, msg);
    }
}
