//! Concrete chain nodes. One module per pipeline stage from `spec.md` §4.

pub mod blocking;
pub mod bootstrap;
pub mod cache;
pub mod client_names;
pub mod conditional;
pub mod custom_dns;
pub mod dns64;
pub mod dnssec;
pub mod ede;
pub mod ecs;
pub mod filtering;
pub mod fqdn_only;
pub mod noop;
pub mod rewriter;
pub mod special_use;
pub mod upstream;
pub mod upstream_group;
