//! Upstream-group selection: strict order vs. parallel-best, and the
//! per-request client-match precedence that picks which group serves a
//! request, per `spec.md` §4.3.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::{Distribution, WeightedIndex};
use rand::thread_rng;

use crate::chain::ChainResolver;
use crate::config::SelectionStrategy;
use crate::error::{CoreError, Result};
use crate::model::{Request, Response};
use crate::resolvers::upstream::UpstreamResolver;
use crate::util::ClientMatcher;

/// A named collection of upstreams sharing one selection strategy.
pub struct UpstreamGroup {
    pub name: String,
    upstreams: Vec<Arc<UpstreamResolver>>,
    strategy: SelectionStrategy,
}

impl UpstreamGroup {
    pub fn new(name: impl Into<String>, upstreams: Vec<Arc<UpstreamResolver>>, strategy: SelectionStrategy) -> Self {
        Self {
            name: name.into(),
            upstreams,
            strategy,
        }
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        if self.upstreams.is_empty() {
            return Err(CoreError::config(
                "upstreamGroup",
                format!("group '{}' has no upstreams configured", self.name),
            ));
        }
        match self.strategy {
            SelectionStrategy::StrictOrder => self.resolve_strict_order(request).await,
            SelectionStrategy::ParallelBest => self.resolve_parallel_best(request).await,
        }
    }

    /// Try upstreams in list order; a transient (timeout/network) failure
    /// escalates to the next, any other error or a successful answer
    /// (including a non-error response code) returns immediately.
    async fn resolve_strict_order(&self, request: &mut Request) -> Result<Response> {
        let mut last_err = None;
        for upstream in &self.upstreams {
            match upstream.resolve(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CoreError::upstream(self.name.clone(), "all upstreams in strict-order group failed")
        }))
    }

    /// Picks two upstreams weighted inversely by recent-error score, races
    /// them, and returns the first success; the loser is dropped (its
    /// future is simply not polled further, cancelling it).
    async fn resolve_parallel_best(&self, request: &mut Request) -> Result<Response> {
        let candidates = self.pick_weighted(2);

        if candidates.len() == 1 {
            return candidates[0].resolve(request).await;
        }

        let mut first = request.clone();
        let mut second = request.clone();
        let a = candidates[0].clone();
        let b = candidates[1].clone();

        let fut_a = async move { a.resolve(&mut first).await };
        let fut_b = async move { b.resolve(&mut second).await };
        tokio::pin!(fut_a);
        tokio::pin!(fut_b);

        let mut a_done = false;
        let mut b_done = false;
        let mut last_err = None;
        loop {
            tokio::select! {
                res = &mut fut_a, if !a_done => {
                    a_done = true;
                    match res {
                        Ok(response) => return Ok(response),
                        Err(err) if err.is_transient() => last_err = Some(err),
                        Err(err) => return Err(err),
                    }
                }
                res = &mut fut_b, if !b_done => {
                    b_done = true;
                    match res {
                        Ok(response) => return Ok(response),
                        Err(err) if err.is_transient() => last_err = Some(err),
                        Err(err) => return Err(err),
                    }
                }
            }
            if a_done && b_done {
                return Err(last_err.unwrap_or_else(|| {
                    CoreError::upstream(self.name.clone(), "both raced upstreams failed")
                }));
            }
        }
    }

    fn pick_weighted(&self, count: usize) -> Vec<Arc<UpstreamResolver>> {
        if self.upstreams.len() <= count {
            return self.upstreams.clone();
        }
        let weights: Vec<f64> = self
            .upstreams
            .iter()
            .map(|u| u.health.weight().max(f64::MIN_POSITIVE))
            .collect();
        let mut chosen = Vec::with_capacity(count);
        let mut remaining: Vec<usize> = (0..self.upstreams.len()).collect();
        let mut rng = thread_rng();
        for _ in 0..count {
            let remaining_weights: Vec<f64> = remaining.iter().map(|&i| weights[i]).collect();
            let dist = match WeightedIndex::new(&remaining_weights) {
                Ok(d) => d,
                Err(_) => break,
            };
            let pick = dist.sample(&mut rng);
            chosen.push(self.upstreams[remaining.remove(pick)].clone());
        }
        chosen
    }
}

/// Routes a request to one of several named [`UpstreamGroup`]s by
/// client-match precedence: exact IP > CIDR > exact client name >
/// wildcard/glob > `default`, per §4.3 and §6.
pub struct UpstreamGroupSelector {
    groups: HashMap<String, UpstreamGroup>,
    client_rules: Vec<(ClientMatcher, String)>,
}

impl UpstreamGroupSelector {
    pub fn new(groups: Vec<UpstreamGroup>, client_rules: Vec<(ClientMatcher, String)>) -> Self {
        let mut by_name = HashMap::new();
        for group in groups {
            by_name.insert(group.name.clone(), group);
        }
        Self {
            groups: by_name,
            client_rules,
        }
    }

    fn select_group_name(&self, request: &Request) -> Option<String> {
        let identifiers = request.client_identifiers();
        let mut best: Option<(u8, &str)> = None;
        let mut tie = false;

        for (matcher, group) in &self.client_rules {
            let matched = matcher.matches_ip(request.effective_ip())
                || identifiers.iter().any(|id| matcher.matches_name(id))
                || matches!(matcher, ClientMatcher::Default);
            if !matched {
                continue;
            }
            let rank = matcher.precedence();
            match best {
                None => best = Some((rank, group.as_str())),
                Some((best_rank, _)) if rank < best_rank => {
                    best = Some((rank, group.as_str()));
                    tie = false;
                }
                Some((best_rank, _)) if rank == best_rank => tie = true,
                _ => {}
            }
        }

        if tie {
            request
                .logger
                .warn("multiple upstream-group client rules tied; using the first by source order");
        }
        best.map(|(_, name)| name.to_string())
    }
}

#[async_trait]
impl ChainResolver for UpstreamGroupSelector {
    fn type_tag(&self) -> &'static str {
        "upstream_group"
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        let group_name = self.select_group_name(request);
        let group_name = match group_name {
            Some(name) => name,
            None => "default".to_string(),
        };
        let group = self.groups.get(&group_name).or_else(|| self.groups.get("default"));
        match group {
            Some(group) => group.resolve(request).await,
            None => Err(CoreError::config(
                "upstreamGroup",
                format!("no upstream group named '{group_name}' and no default group configured"),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;
    use hickory_proto::op::{Message, MessageType, OpCode, Query};
    use hickory_proto::rr::{Name, RecordType};

    fn query_from(client: &str) -> Request {
        let mut message = Message::new();
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(Name::from_ascii("example.com.").unwrap(), RecordType::A));
        Request::new(message, format!("{client}:0").parse().unwrap(), Protocol::Udp)
    }

    fn selector(rules: Vec<(&str, &str)>) -> UpstreamGroupSelector {
        let client_rules = rules
            .into_iter()
            .map(|(matcher, group)| (ClientMatcher::parse(matcher), group.to_string()))
            .collect();
        UpstreamGroupSelector::new(Vec::new(), client_rules)
    }

    #[test]
    fn exact_ip_beats_cidr_and_default() {
        let sel = selector(vec![
            ("default", "fallback"),
            ("10.0.0.0/8", "internal"),
            ("10.0.0.5", "pinned"),
        ]);
        let request = query_from("10.0.0.5");
        assert_eq!(sel.select_group_name(&request), Some("pinned".to_string()));
    }

    #[test]
    fn cidr_beats_default_when_ip_does_not_match_exactly() {
        let sel = selector(vec![("default", "fallback"), ("10.0.0.0/8", "internal")]);
        let request = query_from("10.0.0.200");
        assert_eq!(sel.select_group_name(&request), Some("internal".to_string()));
    }

    #[test]
    fn nothing_matches_but_default_falls_back() {
        let sel = selector(vec![("default", "fallback")]);
        let request = query_from("203.0.113.1");
        assert_eq!(sel.select_group_name(&request), Some("fallback".to_string()));
    }

    #[test]
    fn equal_specificity_tie_picks_first_by_source_order() {
        let sel = selector(vec![("10.0.0.5", "first"), ("10.0.0.5", "second")]);
        let request = query_from("10.0.0.5");
        assert_eq!(sel.select_group_name(&request), Some("first".to_string()));
    }
}
