//! Populates `Request.client_names`, per `spec.md` §4.9.

use std::any::Any;
use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use hickory_proto::op::{MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use lru::LruCache;

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{Protocol, Request, Response};

#[derive(Debug, Clone, Copy)]
pub struct ClientNamesConfig {
    /// Which name to keep when a PTR lookup answers with more than one.
    pub single_name_order: usize,
}

impl Default for ClientNamesConfig {
    fn default() -> Self {
        Self { single_name_order: 0 }
    }
}

pub struct ClientNamesResolver {
    next: ChainLink,
    static_map: HashMap<IpAddr, Vec<String>>,
    ptr_upstream: Option<ChainLink>,
    cache: Mutex<LruCache<IpAddr, Vec<String>>>,
    config: ClientNamesConfig,
}

impl ClientNamesResolver {
    pub fn new(
        next: ChainLink,
        static_map: HashMap<IpAddr, Vec<String>>,
        ptr_upstream: Option<ChainLink>,
        cache_size: usize,
        config: ClientNamesConfig,
    ) -> Self {
        Self {
            next,
            static_map,
            ptr_upstream,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(cache_size.max(1)).unwrap())),
            config,
        }
    }

    /// Backs the admin `FlushCache()` affordance for this resolver.
    pub fn flush_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Vec<String> {
        let Some(upstream) = &self.ptr_upstream else {
            return vec![ip.to_string()];
        };

        let Ok(ptr_name) = build_ptr_name(ip) else {
            return vec![ip.to_string()];
        };
        let mut query_message = hickory_proto::op::Message::new();
        query_message.set_message_type(MessageType::Query);
        query_message.set_op_code(OpCode::Query);
        query_message.set_recursion_desired(true);
        query_message.add_query(Query::query(ptr_name, RecordType::PTR));

        let mut request = Request::new(query_message, (ip, 0).into(), Protocol::Udp);
        match upstream.resolve(&mut request).await {
            Ok(response) => {
                let names: Vec<String> = response
                    .message
                    .answers()
                    .iter()
                    .filter_map(|r| match r.data() {
                        Some(RData::PTR(name)) => Some(name.to_ascii()),
                        _ => None,
                    })
                    .collect();
                if names.is_empty() {
                    vec![ip.to_string()]
                } else {
                    let idx = self.config.single_name_order.min(names.len() - 1);
                    vec![names[idx].clone()]
                }
            }
            Err(_) => vec![ip.to_string()],
        }
    }
}

fn build_ptr_name(ip: IpAddr) -> Result<Name> {
    let arpa = match ip {
        IpAddr::V4(addr) => {
            let [a, b, c, d] = addr.octets();
            format!("{d}.{c}.{b}.{a}.in-addr.arpa.")
        }
        IpAddr::V6(addr) => {
            let mut nibbles = String::with_capacity(64);
            for byte in addr.octets().iter().rev() {
                nibbles.push_str(&format!("{:x}.{:x}.", byte & 0x0f, byte >> 4));
            }
            format!("{nibbles}ip6.arpa.")
        }
    };
    Ok(Name::from_ascii(arpa)?)
}

#[async_trait]
impl ChainResolver for ClientNamesResolver {
    fn type_tag(&self) -> &'static str {
        "client_names"
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        if request.client_names.is_none() {
            let ip = request.client_addr.ip();

            if let Some(id) = request.client_id.clone() {
                request.client_names = Some(vec![id]);
            } else if let Some(names) = self.static_map.get(&ip) {
                request.client_names = Some(names.clone());
            } else {
                let cached = self.cache.lock().unwrap().get(&ip).cloned();
                if let Some(names) = cached {
                    request.client_names = Some(names);
                } else {
                    let names = self.reverse_lookup(ip).await;
                    self.cache.lock().unwrap().put(ip, names.clone());
                    request.client_names = Some(names);
                }
            }
        }

        self.next.resolve(request).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
