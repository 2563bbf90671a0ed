//! Conditional upstream routing by suffix, per `spec.md` §4.9.

use std::any::Any;

use async_trait::async_trait;
use hickory_proto::rr::Name;

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{canonical_name, Request, Response, ResponseType};

use super::rewriter::RewriteMap;

struct ConditionalRule {
    /// Lowercased, trailing-dot suffix; `"."` is a valid catch-all.
    suffix: String,
    target: ChainLink,
    rewrite: Option<RewriteMap>,
}

/// Routes by longest-matching suffix to a per-suffix upstream chain,
/// falling back to `next` when nothing matches.
pub struct ConditionalResolver {
    next: ChainLink,
    rules: Vec<ConditionalRule>,
}

impl ConditionalResolver {
    pub fn new(next: ChainLink, mut rules: Vec<(String, ChainLink, Option<RewriteMap>)>) -> Self {
        rules.sort_by_key(|(suffix, _, _)| std::cmp::Reverse(suffix.len()));
        let rules = rules
            .into_iter()
            .map(|(suffix, target, rewrite)| ConditionalRule { suffix, target, rewrite })
            .collect();
        Self { next, rules }
    }

    fn find_rule(&self, qname: &str) -> Option<&ConditionalRule> {
        self.rules.iter().find(|rule| rule.suffix == "." || qname.ends_with(&rule.suffix))
    }
}

#[async_trait]
impl ChainResolver for ConditionalResolver {
    fn type_tag(&self) -> &'static str {
        "conditional"
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        let qname = canonical_name(request.question().name());
        let Some(rule) = self.find_rule(&qname) else {
            return self.next.resolve(request).await;
        };

        let original_name = request.question().name().clone();
        if let Some(rewrite_map) = &rule.rewrite {
            if let Some((rewritten, _)) = rewrite_map.forward(&qname) {
                if let Ok(new_name) = Name::from_ascii(&rewritten) {
                    request.message.queries_mut()[0].set_name(new_name);
                }
            }
        }

        let mut response = rule.target.resolve(request).await?;
        request.message.queries_mut()[0].set_name(original_name.clone());
        response.message.queries_mut()[0].set_name(original_name);
        response.response_type = ResponseType::Conditional;
        Ok(response)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
