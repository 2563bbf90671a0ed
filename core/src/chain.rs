//! The chain harness: `Resolve(ctx, Request) -> Response`, `Next(successor)`,
//! `GetFromChainWithType`, and `Name()` from `spec.md` §4.1.
//!
//! Successor links are wired at construction time (each resolver owns an
//! `Arc` to the node it delegates to) rather than mutated after the fact —
//! this is the idiomatic-Rust reading of "Chain(nodes…) links nodes into a
//! forward list": the pipeline is built leaves-first (§2's component
//! table is already given in that order) and each wrapper closes over its
//! successor in its own constructor.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Request, Response};

/// A reference-counted handle to a chain member. Cheap to clone; shared
/// between the resolver that owns it as `next` and anything that needs to
/// walk the chain (`get_from_chain`).
pub type ChainLink = Arc<dyn ChainResolver>;

/// Common contract implemented by every non-terminal node.
#[async_trait]
pub trait ChainResolver: Send + Sync + 'static {
    /// Lowercase, no whitespace, without the word "resolver" (e.g.
    /// `"cache"`, `"blocking"`, `"dns64"`).
    fn type_tag(&self) -> &'static str;

    /// Whether this stage participates in resolution at all. Disabled
    /// stages are still linked into the chain but skip straight to `next`.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Hook for emitting this node's effective configuration to the log at
    /// startup, mirroring `shelter`'s practice of logging the resolved CLI
    /// configuration before serving traffic.
    fn log_config(&self) {}

    /// The display name used by [`name`]. Defaults to `type_tag`; the
    /// rewriter wrapper overrides this to read "`<inner tag>` w/ rewrite".
    fn display_name(&self) -> String {
        self.type_tag().to_string()
    }

    /// The successor this node delegates to, or `None` if this is the
    /// chain's tail (the no-op sentinel, or a leaf like the upstream-group
    /// selector that never calls further).
    fn next(&self) -> Option<&ChainLink> {
        None
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response>;

    /// Used by [`get_from_chain`] to find a concretely-typed node without
    /// requiring every resolver to hand-write a downcast.
    fn as_any(&self) -> &dyn Any;
}

/// `Name(node)`: the node's type tag, or for a rewriter wrapper, the
/// inner's tag suffixed with "w/ rewrite" (the rewriter overrides
/// `type_tag` itself to produce this, see `resolvers::rewriter`).
pub fn name(node: &dyn ChainResolver) -> String {
    node.display_name()
}

/// `GetFromChainWithType[T]`: walks from `head` looking for the first node
/// whose concrete type is `T`.
pub fn get_from_chain<'a, T: 'static>(head: &'a ChainLink) -> Option<&'a T> {
    let mut current = head;
    loop {
        if let Some(found) = current.as_any().downcast_ref::<T>() {
            return Some(found);
        }
        match current.next() {
            Some(n) => current = n,
            None => return None,
        }
    }
}

/// `Chain(nodes…)`: returns the head of an already-wired, already-ordered
/// list of resolvers. Linking itself happens at construction time (each
/// node closes over its `next`); this just asserts the list is non-empty
/// and returns its head.
pub fn chain(nodes: Vec<ChainLink>) -> ChainLink {
    nodes
        .into_iter()
        .next()
        .expect("chain() requires at least one resolver")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Request, Response};
    use crate::resolvers::noop::NoOpResolver;

    struct Marker(u32);

    #[async_trait]
    impl ChainResolver for Marker {
        fn type_tag(&self) -> &'static str {
            "marker"
        }

        async fn resolve(&self, _request: &mut Request) -> Result<Response> {
            unreachable!("not exercised by these tests")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn chain_returns_the_first_node() {
        let head: ChainLink = Arc::new(Marker(1));
        let result = chain(vec![head.clone()]);
        assert!(Arc::ptr_eq(&head, &result));
    }

    #[test]
    #[should_panic]
    fn chain_panics_on_empty_list() {
        chain(Vec::new());
    }

    #[test]
    fn get_from_chain_finds_a_concretely_typed_node_by_walking_next() {
        let tail: ChainLink = Arc::new(NoOpResolver);
        let marked = Marker(7);
        let head: ChainLink = Arc::new(marked);
        // NoOpResolver has no `next`, Marker (above) also has none, so this
        // just exercises the single-hop case; downcast still has to match.
        assert!(get_from_chain::<Marker>(&head).is_some());
        assert!(get_from_chain::<NoOpResolver>(&head).is_none());
        assert!(get_from_chain::<NoOpResolver>(&tail).is_some());
    }

    #[test]
    fn name_defaults_to_type_tag() {
        let node: ChainLink = Arc::new(NoOpResolver);
        assert_eq!(name(node.as_ref()), "noop");
    }
}
