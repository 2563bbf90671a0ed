//! Small shared configuration enums referenced by more than one resolver.
//! Per-resolver configuration structs live alongside their resolver so the
//! knobs stay next to the code they tune (see e.g.
//! `resolvers::cache::CacheConfig`, `resolvers::blocking::BlockingConfig`).
//!
//! Actual file/env configuration *parsing* is out of scope for the core
//! (`spec.md` §1); these types are the shape the `forwarder` binary's CLI
//! flags (and, eventually, a config file loader) populate.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{CoreError, Result};

/// How the blocking resolver answers a blocked question, per §4.5 and the
/// block-type enumeration in §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockType {
    ZeroIp,
    NxDomain,
    Literal {
        v4: Option<Ipv4Addr>,
        v6: Option<Ipv6Addr>,
    },
}

impl BlockType {
    /// Parses the `blockType` configuration value. Unknown values fail
    /// construction with the exact message §6 specifies.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "ZeroIP" => Ok(BlockType::ZeroIp),
            "NxDomain" => Ok(BlockType::NxDomain),
            _ => {
                let mut v4 = None;
                let mut v6 = None;
                for part in value.split(',') {
                    let part = part.trim();
                    if let Ok(addr) = part.parse::<Ipv4Addr>() {
                        v4 = Some(addr);
                    } else if let Ok(addr) = part.parse::<Ipv6Addr>() {
                        v6 = Some(addr);
                    } else {
                        return Err(CoreError::config(
                            "blockType",
                            format!(
                                "unknown blockType '{value}', please use one of: ZeroIP, NxDomain or specify destination IP address(es)"
                            ),
                        ));
                    }
                }
                if v4.is_none() && v6.is_none() {
                    return Err(CoreError::config(
                        "blockType",
                        format!(
                            "unknown blockType '{value}', please use one of: ZeroIP, NxDomain or specify destination IP address(es)"
                        ),
                    ));
                }
                Ok(BlockType::Literal { v4, v6 })
            }
        }
    }
}

/// Controls how list-backed resolvers (blocking groups) behave while their
/// sources are still loading, per §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStrategy {
    /// Don't wait for sources; serve with whatever has loaded so far.
    Fast,
    /// Block chain construction until all sources have loaded.
    Blocking,
    /// Abort construction entirely if any source fails to load.
    FailOnError,
}

/// Upstream-group selection strategy, per §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    StrictOrder,
    ParallelBest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_parses_known_values() {
        assert_eq!(BlockType::parse("ZeroIP").unwrap(), BlockType::ZeroIp);
        assert_eq!(BlockType::parse("NxDomain").unwrap(), BlockType::NxDomain);
    }

    #[test]
    fn block_type_parses_literal_pair() {
        let parsed =
            BlockType::parse("12.12.12.12, 2001:0db8:85a3:0000:0000:8a2e:0370:7334").unwrap();
        match parsed {
            BlockType::Literal { v4, v6 } => {
                assert_eq!(v4, Some("12.12.12.12".parse().unwrap()));
                assert_eq!(v6, Some("2001:db8:85a3::8a2e:370:7334".parse().unwrap()));
            }
            _ => panic!("expected literal block type"),
        }
    }

    #[test]
    fn block_type_rejects_unknown_value() {
        let err = BlockType::parse("banana").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
