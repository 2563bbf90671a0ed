//! Compiled matching structures for one list (a denylist or an allowlist),
//! per `spec.md` §4.5: "a trie of domain literals, a list of compiled
//! wildcard patterns, a list of regex patterns, and a set of literal
//! IPv4/IPv6 addresses for answer-IP matching."

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use regex::Regex;

use crate::util::GlobPattern;

#[derive(Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    terminal: bool,
}

/// A domain-literal trie keyed label-by-label from the root down, so a
/// lookup for `a.b.example.com` naturally matches an inserted
/// `example.com` (the literal blocks itself and every subdomain) in
/// O(label count) instead of a linear scan.
#[derive(Default)]
struct DomainTrie {
    root: TrieNode,
}

impl DomainTrie {
    fn insert(&mut self, domain: &str) {
        let mut node = &mut self.root;
        for label in labels_root_first(domain) {
            node = node.children.entry(label).or_default();
        }
        node.terminal = true;
    }

    /// True if `domain` equals, or is a subdomain of, any inserted literal.
    fn matches(&self, domain: &str) -> bool {
        let mut node = &self.root;
        for label in labels_root_first(domain) {
            match node.children.get(&label) {
                Some(next) => {
                    node = next;
                    if node.terminal {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }
}

/// Strips a `#`-to-end-of-line comment and surrounding whitespace, per
/// `spec.md` §6's list-source line format. Returns `None` for a blank or
/// fully-commented line.
fn strip_comment(line: &str) -> Option<&str> {
    let line = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

fn labels_root_first(domain: &str) -> Vec<String> {
    domain
        .trim_end_matches('.')
        .to_ascii_lowercase()
        .split('.')
        .rev()
        .map(String::from)
        .collect()
}

/// One compiled list: a denylist or an allowlist belonging to a single
/// group. Built once at startup (or on list reload) and shared read-only
/// across requests.
pub struct CompiledList {
    literals: DomainTrie,
    wildcards: Vec<GlobPattern>,
    regexes: Vec<Regex>,
    ips: HashSet<IpAddr>,
    entry_count: usize,
}

impl CompiledList {
    /// Compiles one list from its source lines. Per `spec.md` §3, a single
    /// list source mixes domain literals, wildcards, regexes, and literal
    /// IP addresses on their own lines, `#` marking end-of-line comments;
    /// each line is classified independently rather than requiring the
    /// caller to pre-sort entries into separate domain/IP sources.
    pub fn compile(domain_lines: &[String], ip_lines: &[String]) -> Self {
        let mut literals = DomainTrie::default();
        let mut wildcards = Vec::new();
        let mut regexes = Vec::new();
        let mut ips = HashSet::new();
        let mut entry_count = 0;

        for line in domain_lines.iter().chain(ip_lines.iter()) {
            let line = match strip_comment(line) {
                Some(l) => l,
                None => continue,
            };
            entry_count += 1;
            if let Ok(ip) = line.parse::<IpAddr>() {
                ips.insert(ip);
            } else if let Some(pattern) = line.strip_prefix('/').and_then(|s| s.strip_suffix('/')) {
                if let Ok(re) = Regex::new(pattern) {
                    regexes.push(re);
                }
            } else if line.contains(['*', '?', '[']) {
                wildcards.push(GlobPattern::new(line));
            } else {
                literals.insert(line);
            }
        }

        Self {
            literals,
            wildcards,
            regexes,
            ips,
            entry_count,
        }
    }

    pub fn empty() -> Self {
        Self {
            literals: DomainTrie::default(),
            wildcards: Vec::new(),
            regexes: Vec::new(),
            ips: HashSet::new(),
            entry_count: 0,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Returns a human-readable description of the rule that matched, for
    /// the `"BLOCKED (<group>)"`-style reason strings §4.5 specifies.
    ///
    /// Callers always pass the canonical trailing-dot form (`canonical_name`
    /// output). The literal trie strips the trailing dot itself
    /// (`labels_root_first`), but wildcard globs and regexes are matched
    /// whole-string, so the trailing dot is stripped once here before
    /// either runs — otherwise a pattern compiled from an undotted config
    /// line (`*.ads.example.com`) can never match a canonical `qname`.
    pub fn matching_domain_rule(&self, domain: &str) -> Option<String> {
        if self.literals.matches(domain) {
            return Some(domain.to_string());
        }
        let domain = domain.trim_end_matches('.');
        for wildcard in &self.wildcards {
            if wildcard.matches(domain) {
                return Some("wildcard".to_string());
            }
        }
        for regex in &self.regexes {
            if regex.is_match(domain) {
                return Some("regex".to_string());
            }
        }
        None
    }

    pub fn matches_ip(&self, ip: IpAddr) -> bool {
        self.ips.contains(&ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_canonical_trailing_dot_domain() {
        let list = CompiledList::compile(&["*.ads.example.com".to_string()], &[]);
        assert!(list.matching_domain_rule("track.ads.example.com.").is_some());
        assert!(list.matching_domain_rule("ads.example.com.").is_none());
        assert!(list.matching_domain_rule("track.ads.example.net.").is_none());
    }

    #[test]
    fn regex_matches_canonical_trailing_dot_domain() {
        let list = CompiledList::compile(&["/^track\\.ads\\.example\\.com$/".to_string()], &[]);
        assert!(list.matching_domain_rule("track.ads.example.com.").is_some());
    }

    #[test]
    fn literal_matches_subdomains_of_the_stored_domain() {
        let list = CompiledList::compile(&["example.com".to_string()], &[]);
        assert!(list.matching_domain_rule("a.example.com.").is_some());
        assert!(list.matching_domain_rule("other.com.").is_none());
    }
}
