// =============================================================================
// Forensic Ledger: append-only, hash-chained decision record
// =============================================================================
//
// Every decision lands here exactly once, chained by SHA-256 over a
// canonical-JSON preimage:
//
//   - keys in ASCII-sort order (serde_json's BTreeMap-backed Value),
//   - numbers in shortest round-trip form, no whitespace,
//   - `previousHash` included, `entryHash` and the four mutable outcome
//     fields excluded. Outcome resolution is a one-shot transition and must
//     not invalidate the chain.
//
// Capacity is bounded; the oldest entries are evicted FIFO. Eviction never
// rewrites surviving hashes, so verification applies to the surviving
// prefix: linkage is checked between adjacent retained entries only.
// =============================================================================

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{MarketSnapshot, TradeAction};

/// Previous-hash sentinel for the first entry.
pub const GENESIS_HASH: &str = "genesis";

/// Keys excluded from the entry-hash preimage.
const NON_HASHED_KEYS: [&str; 5] = [
    "entryHash",
    "outcomeResolved",
    "outcomeCorrect",
    "pnlPercent",
    "outcomeTimestamp",
];

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One immutable ledger entry. Outcome fields transition exactly once from
/// unresolved to resolved; everything else is frozen at append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub entry_id: String,
    pub sequence_number: u64,
    pub previous_hash: String,
    pub entry_hash: String,
    pub agent_id: String,
    pub round_id: String,
    pub action: TradeAction,
    pub symbol: String,
    pub quantity: f64,
    pub reasoning: String,
    pub confidence: f64,
    pub intent: String,
    pub sources: Vec<String>,
    pub predicted_outcome: Option<String>,
    pub market_snapshot_hash: String,
    pub price_at_trade: f64,
    pub coherence_score: f64,
    pub hallucination_flags: Vec<String>,
    pub discipline_pass: bool,
    pub depth_score: f64,
    pub forensic_score: f64,
    pub efficiency_score: f64,
    pub witnesses: Vec<String>,
    pub outcome_resolved: bool,
    pub outcome_correct: Option<bool>,
    pub pnl_percent: Option<f64>,
    pub outcome_timestamp: Option<String>,
    pub timestamp: String,
    pub benchmark_version: String,
}

/// Fields the orchestrator supplies for an append; ids, sequencing, and
/// hashes are assigned by the ledger.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub agent_id: String,
    pub round_id: String,
    pub action: TradeAction,
    pub symbol: String,
    pub quantity: f64,
    pub reasoning: String,
    pub confidence: f64,
    pub intent: String,
    pub sources: Vec<String>,
    pub predicted_outcome: Option<String>,
    pub market_snapshot_hash: String,
    pub price_at_trade: f64,
    pub coherence_score: f64,
    pub hallucination_flags: Vec<String>,
    pub discipline_pass: bool,
    pub depth_score: f64,
    pub forensic_score: f64,
    pub efficiency_score: f64,
    pub witnesses: Vec<String>,
    pub benchmark_version: String,
}

// ---------------------------------------------------------------------------
// Canonical JSON + hashing
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of `data`.
fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical JSON of an entry's hashed fields: ASCII-sorted keys, compact.
fn hash_preimage(entry: &LedgerEntry) -> String {
    let mut value = serde_json::to_value(entry).expect("ledger entry serializes");
    let map = value.as_object_mut().expect("ledger entry is an object");
    for key in NON_HASHED_KEYS {
        map.remove(key);
    }
    serde_json::to_string(&value).expect("canonical json serializes")
}

/// Recompute an entry's hash from its non-hash fields.
pub fn recompute_hash(entry: &LedgerEntry) -> String {
    sha256_hex(&hash_preimage(entry))
}

/// Hash of a market snapshot: `[symbol, price]` pairs sorted by symbol.
pub fn snapshot_hash(snapshot: &MarketSnapshot) -> String {
    let mut pairs: Vec<(&str, f64)> = snapshot
        .ticks
        .iter()
        .map(|t| (t.symbol.as_str(), t.price))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let value = serde_json::Value::Array(
        pairs
            .into_iter()
            .map(|(s, p)| serde_json::json!([s, p]))
            .collect(),
    );
    sha256_hex(&value.to_string())
}

// ---------------------------------------------------------------------------
// Query / reports
// ---------------------------------------------------------------------------

/// Ledger query filter; unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerQuery {
    pub agent_id: Option<String>,
    pub symbol: Option<String>,
    pub round_id: Option<String>,
    pub action: Option<TradeAction>,
    pub min_coherence: Option<f64>,
    pub max_hallucinations: Option<usize>,
    pub outcome_resolved: Option<bool>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl LedgerQuery {
    fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(agent_id) = &self.agent_id {
            if &entry.agent_id != agent_id {
                return false;
            }
        }
        if let Some(symbol) = &self.symbol {
            if &entry.symbol != symbol {
                return false;
            }
        }
        if let Some(round_id) = &self.round_id {
            if &entry.round_id != round_id {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(min) = self.min_coherence {
            if entry.coherence_score < min {
                return false;
            }
        }
        if let Some(max) = self.max_hallucinations {
            if entry.hallucination_flags.len() > max {
                return false;
            }
        }
        if let Some(resolved) = self.outcome_resolved {
            if entry.outcome_resolved != resolved {
                return false;
            }
        }
        true
    }
}

/// Page of matching entries, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub entries: Vec<LedgerEntry>,
    pub total: usize,
}

/// Result of a full chain verification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub intact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<u64>,
    pub genesis_hash: String,
    pub latest_hash: String,
    pub total_checked: usize,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

const DEFAULT_QUERY_LIMIT: usize = 50;

struct Inner {
    entries: Vec<LedgerEntry>,
    /// Next sequence number; never reused, survives eviction.
    next_seq: u64,
    /// Hash of the most recently appended entry, or the genesis sentinel.
    last_hash: String,
}

/// Append-only hash-chained in-memory ledger.
pub struct ForensicLedger {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl ForensicLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                next_seq: 0,
                last_hash: GENESIS_HASH.to_string(),
            }),
        }
    }

    /// Append a draft as the next chained entry.
    pub fn append(&self, draft: EntryDraft) -> LedgerEntry {
        let mut inner = self.inner.write();

        let mut entry = LedgerEntry {
            entry_id: Uuid::new_v4().to_string(),
            sequence_number: inner.next_seq,
            previous_hash: inner.last_hash.clone(),
            entry_hash: String::new(),
            agent_id: draft.agent_id,
            round_id: draft.round_id,
            action: draft.action,
            symbol: draft.symbol,
            quantity: draft.quantity,
            reasoning: draft.reasoning,
            confidence: draft.confidence,
            intent: draft.intent,
            sources: draft.sources,
            predicted_outcome: draft.predicted_outcome,
            market_snapshot_hash: draft.market_snapshot_hash,
            price_at_trade: draft.price_at_trade,
            coherence_score: draft.coherence_score,
            hallucination_flags: draft.hallucination_flags,
            discipline_pass: draft.discipline_pass,
            depth_score: draft.depth_score,
            forensic_score: draft.forensic_score,
            efficiency_score: draft.efficiency_score,
            witnesses: draft.witnesses,
            outcome_resolved: false,
            outcome_correct: None,
            pnl_percent: None,
            outcome_timestamp: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            benchmark_version: draft.benchmark_version,
        };
        entry.entry_hash = recompute_hash(&entry);

        inner.next_seq += 1;
        inner.last_hash = entry.entry_hash.clone();
        inner.entries.push(entry.clone());

        while inner.entries.len() > self.capacity {
            let evicted = inner.entries.remove(0);
            info!(
                seq = evicted.sequence_number,
                "ledger at capacity, oldest entry evicted"
            );
        }

        entry
    }

    /// Resolve an entry's outcome. The first call wins and returns `true`;
    /// every later call is a no-op returning `false`.
    pub fn resolve_outcome(&self, entry_id: &str, pnl_percent: f64, correct: bool) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.iter_mut().find(|e| e.entry_id == entry_id) else {
            warn!(entry_id, "resolve_outcome: unknown entry");
            return false;
        };

        if entry.outcome_resolved {
            return false;
        }

        entry.outcome_resolved = true;
        entry.outcome_correct = Some(correct);
        entry.pnl_percent = Some(pnl_percent);
        entry.outcome_timestamp = Some(chrono::Utc::now().to_rfc3339());
        true
    }

    /// Recompute every retained hash and check adjacent linkage.
    pub fn verify_integrity(&self) -> IntegrityReport {
        let inner = self.inner.read();
        let entries = &inner.entries;

        let genesis_hash = entries
            .first()
            .map(|e| e.previous_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let latest_hash = inner.last_hash.clone();

        let mut broken_at = None;
        for (i, entry) in entries.iter().enumerate() {
            if recompute_hash(entry) != entry.entry_hash {
                broken_at = Some(entry.sequence_number);
                break;
            }
            if i > 0 && entry.previous_hash != entries[i - 1].entry_hash {
                broken_at = Some(entry.sequence_number);
                break;
            }
            if entry.sequence_number == 0 && entry.previous_hash != GENESIS_HASH {
                broken_at = Some(0);
                break;
            }
        }

        if let Some(seq) = broken_at {
            warn!(broken_at = seq, "ledger integrity check FAILED");
        }

        IntegrityReport {
            intact: broken_at.is_none(),
            broken_at,
            genesis_hash,
            latest_hash,
            total_checked: entries.len(),
        }
    }

    /// Filtered page of entries, newest first.
    pub fn query(&self, query: &LedgerQuery) -> QueryResult {
        let inner = self.inner.read();
        let matching: Vec<&LedgerEntry> = inner
            .entries
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .collect();

        let total = matching.len();
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(DEFAULT_QUERY_LIMIT);

        QueryResult {
            entries: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            total,
        }
    }

    /// Newline-delimited JSON of matching entries in chronological order,
    /// with keys in the canonical (ASCII-sorted) order used for hashing.
    pub fn export_jsonl(&self, agent_id: Option<&str>) -> String {
        let inner = self.inner.read();
        let mut out = String::new();
        for entry in inner
            .entries
            .iter()
            .filter(|e| agent_id.map_or(true, |a| e.agent_id == a))
        {
            let value = serde_json::to_value(entry).expect("ledger entry serializes");
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }

    /// CSV export with a fixed header and RFC-4180 quoting.
    pub fn export_csv(&self, agent_id: Option<&str>) -> String {
        let mut out = String::from(
            "entryId,sequenceNumber,agentId,roundId,action,symbol,quantity,confidence,\
             coherenceScore,depthScore,forensicScore,outcomeResolved,pnlPercent,reasoning,timestamp\n",
        );

        let inner = self.inner.read();
        for e in inner
            .entries
            .iter()
            .filter(|e| agent_id.map_or(true, |a| e.agent_id == a))
        {
            let fields = [
                e.entry_id.clone(),
                e.sequence_number.to_string(),
                e.agent_id.clone(),
                e.round_id.clone(),
                e.action.to_string(),
                e.symbol.clone(),
                format_number(e.quantity),
                format_number(e.confidence),
                format_number(e.coherence_score),
                format_number(e.depth_score),
                format_number(e.forensic_score),
                e.outcome_resolved.to_string(),
                e.pnl_percent.map(format_number).unwrap_or_default(),
                e.reasoning.clone(),
                e.timestamp.clone(),
            ];
            let row: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }
        out
    }

    /// Unresolved non-hold entries at least `min_age_secs` old.
    pub fn unresolved_entries(&self, min_age_secs: u64) -> Vec<LedgerEntry> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(min_age_secs as i64);
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| !e.outcome_resolved && e.action != TradeAction::Hold)
            .filter(|e| {
                chrono::DateTime::parse_from_rfc3339(&e.timestamp)
                    .map(|t| t.with_timezone(&chrono::Utc) <= cutoff)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Look up a single entry by id.
    pub fn get(&self, entry_id: &str) -> Option<LedgerEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .find(|e| e.entry_id == entry_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Test hook: corrupt a retained entry's reasoning in place.
    #[cfg(test)]
    pub fn tamper_reasoning(&self, index: usize, value: &str) {
        self.inner.write().entries[index].reasoning = value.to_string();
    }
}

/// Shortest clean representation for CSV numeric cells.
fn format_number(n: f64) -> String {
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// RFC-4180: quote fields containing comma, quote, or newline; double the
/// embedded quotes.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolTick;

    fn draft(agent: &str, round: &str, action: TradeAction) -> EntryDraft {
        EntryDraft {
            agent_id: agent.to_string(),
            round_id: round.to_string(),
            action,
            symbol: "BTCUSDT".to_string(),
            quantity: 100.0,
            reasoning: "volume expansion above resistance".to_string(),
            confidence: 65.0,
            intent: "enter".to_string(),
            sources: vec!["price".to_string()],
            predicted_outcome: Some("up 2% in 24h".to_string()),
            market_snapshot_hash: "abc".to_string(),
            price_at_trade: 65_000.0,
            coherence_score: 0.8,
            hallucination_flags: Vec::new(),
            discipline_pass: true,
            depth_score: 0.6,
            forensic_score: 0.7,
            efficiency_score: 0.5,
            witnesses: vec!["borealis".to_string()],
            benchmark_version: "v24".to_string(),
        }
    }

    #[test]
    fn chain_links_and_verifies() {
        let ledger = ForensicLedger::new(100);
        for i in 0..15 {
            ledger.append(draft("atlas", &format!("round-{}", i / 3), TradeAction::Buy));
        }

        let report = ledger.verify_integrity();
        assert!(report.intact);
        assert_eq!(report.total_checked, 15);
        assert_eq!(report.genesis_hash, GENESIS_HASH);

        let all = ledger.query(&LedgerQuery::default());
        assert_eq!(all.total, 15);
        // Newest first: sequence numbers descend.
        assert_eq!(all.entries[0].sequence_number, 14);
    }

    #[test]
    fn tamper_is_detected_at_the_right_sequence() {
        let ledger = ForensicLedger::new(100);
        for _ in 0..15 {
            ledger.append(draft("atlas", "round-1", TradeAction::Buy));
        }

        ledger.tamper_reasoning(7, "rewritten after the fact");

        let report = ledger.verify_integrity();
        assert!(!report.intact);
        assert_eq!(report.broken_at, Some(7));
    }

    #[test]
    fn eviction_preserves_surviving_prefix_validity() {
        let ledger = ForensicLedger::new(5);
        for _ in 0..12 {
            ledger.append(draft("atlas", "round-1", TradeAction::Sell));
        }

        assert_eq!(ledger.len(), 5);
        let report = ledger.verify_integrity();
        assert!(report.intact);

        // Sequence numbers keep climbing across evictions.
        let page = ledger.query(&LedgerQuery::default());
        assert_eq!(page.entries[0].sequence_number, 11);
        assert_eq!(page.entries[4].sequence_number, 7);
    }

    #[test]
    fn outcome_resolution_is_once() {
        let ledger = ForensicLedger::new(100);
        let entry = ledger.append(draft("atlas", "round-1", TradeAction::Buy));

        assert!(ledger.resolve_outcome(&entry.entry_id, 2.5, true));
        assert!(!ledger.resolve_outcome(&entry.entry_id, -9.0, false));

        let stored = ledger.get(&entry.entry_id).unwrap();
        assert!(stored.outcome_resolved);
        assert_eq!(stored.outcome_correct, Some(true));
        assert_eq!(stored.pnl_percent, Some(2.5));

        // Resolution does not break the chain.
        assert!(ledger.verify_integrity().intact);
    }

    #[test]
    fn resolve_unknown_entry_is_false() {
        let ledger = ForensicLedger::new(100);
        assert!(!ledger.resolve_outcome("nope", 0.0, false));
    }

    #[test]
    fn hash_is_deterministic_and_bit_sensitive() {
        let ledger = ForensicLedger::new(100);
        let entry = ledger.append(draft("atlas", "round-1", TradeAction::Buy));

        assert_eq!(recompute_hash(&entry), entry.entry_hash);

        let mut mutated = entry.clone();
        mutated.confidence = 65.000001;
        assert_ne!(recompute_hash(&mutated), entry.entry_hash);
    }

    #[test]
    fn preimage_keys_are_ascii_sorted() {
        let ledger = ForensicLedger::new(100);
        let entry = ledger.append(draft("atlas", "round-1", TradeAction::Buy));
        let preimage = hash_preimage(&entry);

        let agent_pos = preimage.find("\"agentId\"").unwrap();
        let action_pos = preimage.find("\"action\"").unwrap();
        let witness_pos = preimage.find("\"witnesses\"").unwrap();
        assert!(action_pos < agent_pos);
        assert!(agent_pos < witness_pos);
        assert!(!preimage.contains("entryHash"));
        assert!(!preimage.contains("outcomeResolved"));
        assert!(!preimage.contains(' '));
    }

    #[test]
    fn snapshot_hash_sorts_symbols() {
        let a = MarketSnapshot {
            captured_at: "t1".into(),
            ticks: vec![
                SymbolTick {
                    symbol: "ETHUSDT".into(),
                    price: 3200.0,
                    change_24h: 0.0,
                    volume_24h: 0.0,
                },
                SymbolTick {
                    symbol: "BTCUSDT".into(),
                    price: 65000.0,
                    change_24h: 0.0,
                    volume_24h: 0.0,
                },
            ],
        };
        let mut b = a.clone();
        b.ticks.reverse();
        b.captured_at = "t2".into();

        // Order and capture time do not matter, only the sorted price map.
        assert_eq!(snapshot_hash(&a), snapshot_hash(&b));

        b.ticks[0].price += 0.01;
        assert_ne!(snapshot_hash(&a), snapshot_hash(&b));
    }

    #[test]
    fn query_filters_compose() {
        let ledger = ForensicLedger::new(100);
        ledger.append(draft("atlas", "round-1", TradeAction::Buy));
        ledger.append(draft("borealis", "round-1", TradeAction::Sell));
        let mut d = draft("atlas", "round-2", TradeAction::Buy);
        d.coherence_score = 0.2;
        d.hallucination_flags = vec!["invented ticker".to_string()];
        ledger.append(d);

        let result = ledger.query(&LedgerQuery {
            agent_id: Some("atlas".into()),
            min_coherence: Some(0.5),
            ..LedgerQuery::default()
        });
        assert_eq!(result.total, 1);
        assert_eq!(result.entries[0].round_id, "round-1");

        let no_flags = ledger.query(&LedgerQuery {
            max_hallucinations: Some(0),
            ..LedgerQuery::default()
        });
        assert_eq!(no_flags.total, 2);
    }

    #[test]
    fn query_paginates_newest_first() {
        let ledger = ForensicLedger::new(100);
        for _ in 0..10 {
            ledger.append(draft("atlas", "round-1", TradeAction::Buy));
        }
        let page = ledger.query(&LedgerQuery {
            offset: Some(2),
            limit: Some(3),
            ..LedgerQuery::default()
        });
        assert_eq!(page.total, 10);
        assert_eq!(page.entries.len(), 3);
        assert_eq!(page.entries[0].sequence_number, 7);
    }

    #[test]
    fn jsonl_is_chronological_with_sorted_keys() {
        let ledger = ForensicLedger::new(100);
        ledger.append(draft("atlas", "round-1", TradeAction::Buy));
        ledger.append(draft("borealis", "round-1", TradeAction::Sell));

        let jsonl = ledger.export_jsonl(None);
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["sequenceNumber"], 0);
        assert!(lines[0].find("\"action\"").unwrap() < lines[0].find("\"agentId\"").unwrap());

        let only_atlas = ledger.export_jsonl(Some("atlas"));
        assert_eq!(only_atlas.lines().count(), 1);
    }

    #[test]
    fn csv_quotes_embedded_commas_and_quotes() {
        let ledger = ForensicLedger::new(100);
        let mut d = draft("atlas", "round-1", TradeAction::Buy);
        d.reasoning = "breakout, with \"strong\" volume".to_string();
        ledger.append(d);

        let csv = ledger.export_csv(None);
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("entryId,sequenceNumber"));
        let row = lines.next().unwrap();
        assert!(row.contains("\"breakout, with \"\"strong\"\" volume\""));
    }

    #[test]
    fn unresolved_entries_skip_holds_and_resolved() {
        let ledger = ForensicLedger::new(100);
        let buy = ledger.append(draft("atlas", "round-1", TradeAction::Buy));
        ledger.append(draft("atlas", "round-1", TradeAction::Hold));
        let sell = ledger.append(draft("borealis", "round-1", TradeAction::Sell));
        ledger.resolve_outcome(&sell.entry_id, 1.0, true);

        let pending = ledger.unresolved_entries(0);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entry_id, buy.entry_id);
    }
}
