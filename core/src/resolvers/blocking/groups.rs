//! Group compilation and loading, per `spec.md` §4.5's "Groups compiled at
//! startup" paragraph.
//!
//! List-file download/parsing is named an out-of-scope external collaborator
//! (`spec.md` §1); this module only defines the [`ListSource`] seam a
//! caller's loader plugs into and the `startStrategy` bookkeeping around it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::config::StartStrategy;
use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus, ListType};

use super::matcher::CompiledList;

/// Supplies raw list lines (domains or IPs, one per line) from wherever a
/// deployment keeps them — a local file, an HTTP download, a zone pulled
/// from a management API. The core only needs the lines back.
#[async_trait]
pub trait ListSource: Send + Sync {
    async fn load(&self) -> Result<Vec<String>>;
}

/// A static in-memory source, mostly useful for tests and for groups with
/// an inline configuration list rather than an external file.
pub struct StaticListSource {
    lines: Vec<String>,
}

impl StaticListSource {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl ListSource for StaticListSource {
    async fn load(&self) -> Result<Vec<String>> {
        Ok(self.lines.clone())
    }
}

/// One group's configuration: its name and the sources backing its
/// denylist and allowlist domain/IP entries.
pub struct GroupSpec {
    pub name: String,
    pub denylist_sources: Vec<Arc<dyn ListSource>>,
    pub denylist_ip_sources: Vec<Arc<dyn ListSource>>,
    pub allowlist_sources: Vec<Arc<dyn ListSource>>,
    pub allowlist_ip_sources: Vec<Arc<dyn ListSource>>,
}

/// A compiled, immutable snapshot of one group's lists (Invariant 5: lists
/// are read-only after load; reloads swap the whole snapshot atomically via
/// `arc-swap`-style replacement at the holder).
pub struct CompiledGroup {
    pub name: String,
    pub denylist: CompiledList,
    pub allowlist: CompiledList,
}

async fn load_and_compile(
    domain_sources: &[Arc<dyn ListSource>],
    ip_sources: &[Arc<dyn ListSource>],
    start_strategy: StartStrategy,
) -> Result<(Vec<String>, Vec<String>)> {
    let mut domain_lines = Vec::new();
    let mut ip_lines = Vec::new();

    for source in domain_sources {
        match source.load().await {
            Ok(lines) => domain_lines.extend(lines),
            Err(err) if start_strategy == StartStrategy::FailOnError => return Err(err),
            Err(_) => {}
        }
    }
    for source in ip_sources {
        match source.load().await {
            Ok(lines) => ip_lines.extend(lines),
            Err(err) if start_strategy == StartStrategy::FailOnError => return Err(err),
            Err(_) => {}
        }
    }

    Ok((domain_lines, ip_lines))
}

/// Compiles every configured group, honoring `startStrategy`:
/// - `Fast` starts loading in the background and returns immediately with
///   empty lists for groups still loading (handled by the caller awaiting
///   or not awaiting this future).
/// - `Blocking` awaits every source before returning.
/// - `FailOnError` awaits every source and aborts the whole construction on
///   the first load error.
pub async fn compile_groups(
    specs: Vec<GroupSpec>,
    start_strategy: StartStrategy,
    events: &EventBus,
) -> Result<HashMap<String, CompiledGroup>> {
    let mut out = HashMap::new();
    for spec in specs {
        let (deny_domains, deny_ips) =
            load_and_compile(&spec.denylist_sources, &spec.denylist_ip_sources, start_strategy).await?;
        let (allow_domains, allow_ips) =
            load_and_compile(&spec.allowlist_sources, &spec.allowlist_ip_sources, start_strategy).await?;

        let denylist = CompiledList::compile(&deny_domains, &deny_ips);
        let allowlist = CompiledList::compile(&allow_domains, &allow_ips);

        events.publish(Event::BlockingCacheGroupChanged {
            list_type: ListType::Block,
            group: spec.name.clone(),
            entry_count: denylist.entry_count(),
        });
        events.publish(Event::BlockingCacheGroupChanged {
            list_type: ListType::Allow,
            group: spec.name.clone(),
            entry_count: allowlist.entry_count(),
        });

        out.insert(
            spec.name.clone(),
            CompiledGroup {
                name: spec.name,
                denylist,
                allowlist,
            },
        );
    }
    Ok(out)
}

pub fn unknown_group_error(name: &str) -> CoreError {
    CoreError::operational("blocking", format!("unknown group '{name}'"))
}

pub fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSource;

    #[async_trait]
    impl ListSource for FailingSource {
        async fn load(&self) -> Result<Vec<String>> {
            Err(CoreError::config("list", "unreachable"))
        }
    }

    fn spec(name: &str, denylist: Vec<&str>) -> GroupSpec {
        GroupSpec {
            name: name.to_string(),
            denylist_sources: vec![Arc::new(StaticListSource::new(
                denylist.into_iter().map(String::from).collect(),
            ))],
            denylist_ip_sources: Vec::new(),
            allowlist_sources: Vec::new(),
            allowlist_ip_sources: Vec::new(),
        }
    }

    #[tokio::test]
    async fn blocking_strategy_waits_for_every_source() {
        let events = EventBus::new();
        let compiled = compile_groups(vec![spec("default", vec!["ads.example.com"])], StartStrategy::Blocking, &events)
            .await
            .unwrap();
        assert_eq!(compiled["default"].denylist.entry_count(), 1);
    }

    #[tokio::test]
    async fn fail_on_error_aborts_construction() {
        let mut group = spec("default", vec!["ads.example.com"]);
        group.denylist_sources.push(Arc::new(FailingSource));
        let events = EventBus::new();
        let result = compile_groups(vec![group], StartStrategy::FailOnError, &events).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fast_strategy_tolerates_a_failing_source() {
        let mut group = spec("default", vec!["ads.example.com"]);
        group.denylist_sources.push(Arc::new(FailingSource));
        let events = EventBus::new();
        let compiled = compile_groups(vec![group], StartStrategy::Fast, &events).await.unwrap();
        assert_eq!(compiled["default"].denylist.entry_count(), 1);
    }

    #[tokio::test]
    async fn reload_publishes_entry_count_per_group() {
        let events = EventBus::new();
        let mut subscriber = events.subscribe();
        compile_groups(vec![spec("default", vec!["a.com", "b.com"])], StartStrategy::Blocking, &events)
            .await
            .unwrap();

        let mut saw_block_count = None;
        while let Ok(event) = subscriber.try_recv() {
            if let Event::BlockingCacheGroupChanged { list_type: ListType::Block, group, entry_count } = event {
                if group == "default" {
                    saw_block_count = Some(entry_count);
                }
            }
        }
        assert_eq!(saw_block_count, Some(2));
    }
}
