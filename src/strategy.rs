//! Business-logic strategies for batch processing.
//!
//! The scheduler core is strategy-agnostic: each row passes through a
//! preprocess capability (key derivation, used for sorted traversal) and a
//! process capability (the actual match). The active strategy is selected
//! once at startup from a closed set and never reconfigured while traffic
//! is flowing; thread safety follows from set-once-before-use.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::protocol::MessageType;

/// A single bid: an ad creative and its price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub ad_id: String,
    pub price_micros: u64,
}

/// Keyword -> bids inventory used by the ad-match strategy.
///
/// Loaded by the bootstrap layer from a `keyword ad_id price` line file
/// and handed in at startup.
#[derive(Debug, Clone, Default)]
pub struct BidTable {
    bids: HashMap<String, Vec<Bid>>,
}

impl BidTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, keyword: &str, ad_id: &str, price_micros: u64) {
        self.bids.entry(keyword.to_string()).or_default().push(Bid {
            ad_id: ad_id.to_string(),
            price_micros,
        });
    }

    /// Parse `keyword ad_id price` lines. Malformed lines are skipped
    /// with a warning rather than failing the whole inventory.
    pub fn from_lines(input: &str) -> Self {
        let mut table = Self::new();
        for (lineno, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(keyword), Some(ad_id), Some(price)) => match price.parse::<u64>() {
                    Ok(price_micros) => table.insert(keyword, ad_id, price_micros),
                    Err(_) => {
                        tracing::warn!(lineno, line, "bid line has non-numeric price, skipping");
                    }
                },
                _ => {
                    tracing::warn!(lineno, line, "bid line has too few fields, skipping");
                }
            }
        }
        table
    }

    /// Highest-priced bid for a keyword, if any.
    pub fn best_bid(&self, keyword: &str) -> Option<&Bid> {
        self.bids
            .get(keyword)?
            .iter()
            .max_by_key(|bid| bid.price_micros)
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }
}

/// The closed set of batch-processing strategies.
#[derive(Debug, Clone)]
pub enum MatchStrategy {
    /// Match each row's leading keyword against the bid inventory.
    AdMatch(BidTable),
    /// Return each row unchanged.
    Echo,
    /// Return a JSON record describing how each row was handled.
    Diagnostic,
}

impl MatchStrategy {
    /// Select a strategy by configuration name.
    pub fn from_name(name: &str, bids: BidTable) -> Option<Self> {
        match name {
            "admatch" => Some(Self::AdMatch(bids)),
            "echo" => Some(Self::Echo),
            "diagnostic" => Some(Self::Diagnostic),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AdMatch(_) => "admatch",
            Self::Echo => "echo",
            Self::Diagnostic => "diagnostic",
        }
    }

    /// Message type carried by batches this strategy answers.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::AdMatch(_) => MessageType::BidRequest,
            Self::Echo | Self::Diagnostic => MessageType::EchoRequest,
        }
    }

    /// Preprocess capability: derive the sort/group key for a row.
    ///
    /// Ad matching keys on the leading keyword so equal keywords are
    /// visited together during the process phase; echo and diagnostic key
    /// on the whole row.
    pub fn derive_key(&self, value: &str) -> String {
        match self {
            Self::AdMatch(_) => value
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string(),
            Self::Echo | Self::Diagnostic => value.to_string(),
        }
    }

    /// Process capability: produce the response line for one row.
    pub fn process(&self, key: &str, value: &str, diagnostics: bool) -> String {
        let started = Instant::now();
        let line = match self {
            Self::AdMatch(table) => match table.best_bid(key) {
                Some(bid) => format!("{} {}", bid.ad_id, bid.price_micros),
                None => "no-bid".to_string(),
            },
            Self::Echo => value.to_string(),
            Self::Diagnostic => serde_json::json!({
                "key": key,
                "value": value,
                "worker": std::thread::current().name().unwrap_or("unnamed"),
                "at": chrono::Utc::now().to_rfc3339(),
            })
            .to_string(),
        };

        if diagnostics && !matches!(self, Self::Diagnostic) {
            let elapsed_us = started.elapsed().as_micros();
            format!("{line} key={key} elapsed_us={elapsed_us}")
        } else {
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> BidTable {
        BidTable::from_lines(
            "# keyword ad_id price\n\
             shoes ad-17 120000\n\
             shoes ad-03 450000\n\
             hats ad-22 90000\n\
             bad-line only-two\n",
        )
    }

    #[test]
    fn bid_table_parses_and_skips_malformed() {
        let table = sample_table();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn best_bid_picks_highest_price() {
        let table = sample_table();
        let bid = table.best_bid("shoes").unwrap();
        assert_eq!(bid.ad_id, "ad-03");
        assert_eq!(bid.price_micros, 450_000);
    }

    #[test]
    fn admatch_keys_on_leading_keyword() {
        let strategy = MatchStrategy::AdMatch(sample_table());
        assert_eq!(strategy.derive_key("shoes red size-9"), "shoes");
        assert_eq!(strategy.process("shoes", "shoes red size-9", false), "ad-03 450000");
        assert_eq!(strategy.process("boots", "boots black", false), "no-bid");
    }

    #[test]
    fn echo_returns_value_unchanged() {
        let strategy = MatchStrategy::Echo;
        assert_eq!(strategy.derive_key("hello world"), "hello world");
        assert_eq!(strategy.process("hello world", "hello world", false), "hello world");
    }

    #[test]
    fn diagnostics_flag_appends_detail() {
        let strategy = MatchStrategy::Echo;
        let out = strategy.process("k", "k", true);
        assert!(out.contains("key=k"));
        assert!(out.contains("elapsed_us="));
    }

    #[test]
    fn diagnostic_strategy_emits_json() {
        let strategy = MatchStrategy::Diagnostic;
        let out = strategy.process("a", "a b", false);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["key"], "a");
        assert_eq!(parsed["value"], "a b");
    }

    #[test]
    fn message_type_follows_strategy() {
        assert_eq!(
            MatchStrategy::AdMatch(BidTable::new()).message_type(),
            MessageType::BidRequest
        );
        assert_eq!(MatchStrategy::Echo.message_type(), MessageType::EchoRequest);
        assert_eq!(
            MatchStrategy::Diagnostic.message_type(),
            MessageType::EchoRequest
        );
    }

    #[test]
    fn from_name_covers_closed_set() {
        assert!(MatchStrategy::from_name("admatch", BidTable::new()).is_some());
        assert!(MatchStrategy::from_name("echo", BidTable::new()).is_some());
        assert!(MatchStrategy::from_name("diagnostic", BidTable::new()).is_some());
        assert!(MatchStrategy::from_name("bogus", BidTable::new()).is_none());
    }
}
