//! Decision text parser
//!
//! Turns one raw decision text, possibly covering several symbols, into a
//! [`Decision`] per configured symbol. Parsing never fails the batch: a
//! symbol whose section is missing or whose direction is unrecognized
//! comes back with `valid == false` and a diagnostic reason.

use super::patterns::PatternSet;
use super::{Decision, TradeAction};
use crate::execution::exchange_symbol;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Highest leverage any venue accepts
const MAX_LEVERAGE: u32 = 125;

/// Result of scanning a block for a direction
#[derive(Debug, PartialEq)]
enum ActionMatch {
    Found(TradeAction),
    Unknown(String),
    Missing,
}

#[derive(Debug, Deserialize)]
struct JsonDecision {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    confidence: Option<Decimal>,
    #[serde(default)]
    leverage: Option<u32>,
    #[serde(default)]
    position_size: Option<Decimal>,
    #[serde(default)]
    stop_loss: Option<Decimal>,
    #[serde(default)]
    new_stop_loss: Option<Decimal>,
    #[serde(default, alias = "reason")]
    reasoning: String,
    #[serde(default)]
    stop_loss_reason: Option<String>,
    #[serde(default)]
    summary: String,
}

/// Parser for free-form and JSON decision texts
#[derive(Debug, Clone)]
pub struct DecisionParser {
    patterns: PatternSet,
}

impl DecisionParser {
    /// Compile the pattern tables
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: PatternSet::compile()?,
        })
    }

    /// Parse `text` into one decision per symbol in `symbols`
    pub fn parse(&self, text: &str, symbols: &[String]) -> BTreeMap<String, Decision> {
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            if let Some(decisions) = self.parse_json(trimmed, symbols) {
                return decisions;
            }
            tracing::debug!("Decision text is not valid JSON, falling back to text parsing");
        }

        let section = self.final_section(text);
        symbols
            .iter()
            .map(|symbol| {
                let decision = match symbol_block(section, symbol) {
                    Ok(Some(block)) => self.parse_block(symbol, block),
                    Ok(None) => Decision::invalid(
                        symbol.as_str(),
                        format!("No decision section found for {}", symbol),
                    ),
                    Err(e) => Decision::invalid(
                        symbol.as_str(),
                        format!("Bad symbol pattern for {}: {}", symbol, e),
                    ),
                };
                if !decision.valid {
                    tracing::warn!(%symbol, reason = %decision.reason, "Decision degraded to invalid");
                }
                (symbol.clone(), decision)
            })
            .collect()
    }

    /// Parse a single symbol's block of text
    pub fn parse_block(&self, symbol: &str, block: &str) -> Decision {
        let action = match self.extract_action(block) {
            ActionMatch::Found(action) => action,
            ActionMatch::Unknown(word) => {
                return Decision::invalid(symbol, format!("Unknown action: {}", word))
            }
            ActionMatch::Missing => {
                return Decision::invalid(symbol, "No recognizable trade direction")
            }
        };

        Decision {
            symbol: symbol.to_string(),
            action,
            confidence: self.extract_confidence(block),
            leverage: self.extract_leverage(block),
            position_size_pct: self.extract_position_size(block),
            stop_loss: self.extract_stop_loss(block),
            reason: self.extract_reason(block),
            valid: true,
        }
    }

    fn final_section<'a>(&self, text: &'a str) -> &'a str {
        self.patterns
            .sections
            .iter()
            .find_map(|re| re.captures(text).and_then(|c| c.get(1)))
            .map(|m| m.as_str())
            .unwrap_or(text)
    }

    fn extract_action(&self, block: &str) -> ActionMatch {
        for re in &self.patterns.fields {
            if let Some(caps) = re.captures(block) {
                let word = caps[1].to_lowercase();
                return match TradeAction::from_keyword(&word) {
                    Some(action) => ActionMatch::Found(action),
                    None => ActionMatch::Unknown(word),
                };
            }
        }

        for table in [&self.patterns.recommendations, &self.patterns.keywords] {
            for (action, patterns) in table {
                if patterns.iter().any(|re| affirmative_match(re, block)) {
                    return ActionMatch::Found(*action);
                }
            }
        }

        ActionMatch::Missing
    }

    fn extract_confidence(&self, block: &str) -> Decimal {
        first_number(&self.patterns.confidence, block)
            .map(|value| {
                let value = if value > Decimal::ONE {
                    value / Decimal::ONE_HUNDRED
                } else {
                    value
                };
                value.clamp(Decimal::ZERO, Decimal::ONE)
            })
            .unwrap_or(Decimal::ZERO)
    }

    fn extract_leverage(&self, block: &str) -> u32 {
        self.patterns
            .leverage
            .iter()
            .find_map(|re| re.captures(block))
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .filter(|l| (1..=MAX_LEVERAGE).contains(l))
            .unwrap_or(0)
    }

    fn extract_stop_loss(&self, block: &str) -> Option<Decimal> {
        first_number(&self.patterns.stop_loss, block).filter(|p| *p > Decimal::ZERO)
    }

    fn extract_position_size(&self, block: &str) -> Decimal {
        first_number(&self.patterns.position_size, block)
            .filter(|p| *p > Decimal::ZERO && *p <= Decimal::ONE_HUNDRED)
            .unwrap_or(Decimal::ZERO)
    }

    fn extract_reason(&self, block: &str) -> String {
        if let Some(caps) = self.patterns.reason.iter().find_map(|re| re.captures(block)) {
            let reason = caps[1].trim().trim_matches('*').trim();
            if !reason.is_empty() {
                return reason.to_string();
            }
        }

        block
            .lines()
            .map(str::trim)
            .find(|line| line.chars().count() > 30 && !line.starts_with('#'))
            .map(|line| line.replace("**", "").trim().to_string())
            .unwrap_or_default()
    }

    fn parse_json(&self, text: &str, symbols: &[String]) -> Option<BTreeMap<String, Decision>> {
        if let Ok(multi) = serde_json::from_str::<HashMap<String, JsonDecision>>(text) {
            if !multi.is_empty() {
                let decisions = symbols
                    .iter()
                    .map(|symbol| {
                        let decision = multi
                            .iter()
                            .find(|(key, _)| same_symbol(key, symbol))
                            .map(|(_, d)| json_to_decision(symbol, d))
                            .unwrap_or_else(|| {
                                Decision::invalid(
                                    symbol.as_str(),
                                    format!("No JSON decision for {}", symbol),
                                )
                            });
                        (symbol.clone(), decision)
                    })
                    .collect();
                return Some(decisions);
            }
        }

        let single: JsonDecision = serde_json::from_str(text).ok()?;
        if single.symbol.is_empty() {
            return None;
        }
        Some(
            symbols
                .iter()
                .map(|symbol| {
                    let decision = if same_symbol(&single.symbol, symbol) {
                        json_to_decision(symbol, &single)
                    } else {
                        Decision::invalid(
                            symbol.as_str(),
                            format!("JSON decision does not mention {}", symbol),
                        )
                    };
                    (symbol.clone(), decision)
                })
                .collect(),
        )
    }
}

fn json_to_decision(symbol: &str, json: &JsonDecision) -> Decision {
    let Some(action) = TradeAction::from_keyword(&json.action) else {
        return Decision::invalid(symbol, format!("Unknown JSON action: {}", json.action));
    };

    let stop_loss = match (action, json.new_stop_loss) {
        (TradeAction::Hold, Some(stop)) if stop > Decimal::ZERO => Some(stop),
        _ => json.stop_loss,
    }
    .filter(|s| *s > Decimal::ZERO);

    let reason = json
        .stop_loss_reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .or_else(|| Some(json.reasoning.trim()).filter(|r| !r.is_empty()))
        .unwrap_or_else(|| json.summary.trim())
        .to_string();

    let confidence = json.confidence.unwrap_or(Decimal::ZERO);
    let confidence = if confidence > Decimal::ONE {
        confidence / Decimal::ONE_HUNDRED
    } else {
        confidence
    };

    Decision {
        symbol: symbol.to_string(),
        action,
        confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
        leverage: json
            .leverage
            .filter(|l| (1..=MAX_LEVERAGE).contains(l))
            .unwrap_or(0),
        position_size_pct: json
            .position_size
            .filter(|p| *p > Decimal::ZERO && *p <= Decimal::ONE_HUNDRED)
            .unwrap_or(Decimal::ZERO),
        stop_loss,
        reason,
        valid: true,
    }
}

/// `BTC/USDT`, `btc/usdt` and `BTCUSDT` name the same market
fn same_symbol(a: &str, b: &str) -> bool {
    exchange_symbol(a) == exchange_symbol(b)
}

/// Locate the block of text belonging to `symbol`
fn symbol_block<'a>(text: &'a str, symbol: &str) -> Result<Option<&'a str>, regex::Error> {
    let sym = regex::escape(symbol);
    let base = regex::escape(symbol.split('/').next().unwrap_or(symbol));
    let patterns = [
        format!(r"(?si)【\s*{}\s*】(.*?)(?:【|$)", sym),
        format!(r"(?si)【\s*{}\s*】(.*?)(?:【|$)", base),
        format!(r"(?si)#{{1,6}}\s*\*{{0,2}}{}\*{{0,2}}[^\n]*\n(.*?)(?:\n#{{1,6}}\s|$)", sym),
        format!(
            r"(?si)\*{{0,2}}{}\*{{0,2}}(.*?)(?:\n\s*\n|\n\s*\*{{0,2}}[a-z0-9]{{2,10}}/[a-z]{{3,5}}|$)",
            sym
        ),
    ];

    for pattern in &patterns {
        let re = Regex::new(pattern)?;
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            if !m.as_str().trim().is_empty() {
                return Ok(Some(m.as_str()));
            }
        }
    }
    Ok(None)
}

/// Whether `re` matches somewhere not negated ("不建议做多", "建议不要做多", "recommend not to buy")
fn affirmative_match(re: &Regex, text: &str) -> bool {
    // a pattern that spells out its own negation ("不建议操作") is taken as written
    let check_span = !has_negation(re.as_str());
    let mut start = 0;
    while let Some(m) = re.find_at(text, start) {
        let span_negated = check_span && has_negation(m.as_str());
        if !span_negated && !negated(clause_before(text, m.start())) {
            return true;
        }
        // retry from the next character so a later, un-negated match is still found
        start = m.start() + text[m.start()..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

const NEGATIONS_ZH: &[&str] = &["不", "别", "勿", "避免"];
const NEGATIONS_EN: &[&str] = &["not", "don't", "dont", "no", "never", "avoid"];
const CLAUSE_BREAKS: &[char] = &['，', ',', '。', '；', ';', '！', '!', '？', '?', '\n'];
/// Characters before a match searched for a Chinese negation
const NEGATION_WINDOW: usize = 4;

fn has_negation(fragment: &str) -> bool {
    let lower = fragment.to_lowercase();
    NEGATIONS_ZH.iter().any(|n| lower.contains(n))
        || lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .any(|w| NEGATIONS_EN.contains(&w))
}

/// The clause that ends at byte offset `end`
fn clause_before(text: &str, end: usize) -> &str {
    let before = &text[..end];
    match before.char_indices().rev().find(|(_, c)| CLAUSE_BREAKS.contains(c)) {
        Some((i, c)) => &before[i + c.len_utf8()..],
        None => before,
    }
}

/// Negation directly ahead of a match: a Chinese negation within a few
/// characters, or an English one among the last two words
fn negated(clause: &str) -> bool {
    let lower = clause.trim_end().to_lowercase();
    let tail: String = {
        let chars: Vec<char> = lower.chars().collect();
        chars[chars.len().saturating_sub(NEGATION_WINDOW)..].iter().collect()
    };
    if NEGATIONS_ZH.iter().any(|n| tail.contains(n)) {
        return true;
    }
    lower
        .split_whitespace()
        .rev()
        .take(2)
        .any(|w| NEGATIONS_EN.contains(&w))
}

/// First numeric capture across `patterns`, with `$` and thousands separators removed
fn first_number(patterns: &[Regex], text: &str) -> Option<Decimal> {
    patterns.iter().find_map(|re| {
        let caps = re.captures(text)?;
        let raw = caps[1].replace([',', '$'], "");
        Decimal::from_str(raw.trim()).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_parser() -> DecisionParser {
        DecisionParser::new().unwrap()
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_multi_symbol_partial_direction() {
        let parser = create_test_parser();
        let text = "## 最终决策\n\
            【BTC/USDT】\n**交易方向**: BUY\n**置信度**: 0.82\n**杠杆倍数**: 15x\n**止损价格**: $95,000\n**理由**: 突破关键阻力\n\
            【ETH/USDT】\n市场情绪中性，数据不足以给出方向判断\n";

        let decisions = parser.parse(text, &symbols(&["BTC/USDT", "ETH/USDT"]));

        let btc = &decisions["BTC/USDT"];
        assert!(btc.valid);
        assert_eq!(btc.action, TradeAction::Buy);
        assert_eq!(btc.confidence, dec!(0.82));
        assert_eq!(btc.leverage, 15);
        assert_eq!(btc.stop_loss, Some(dec!(95000)));
        assert_eq!(btc.reason, "突破关键阻力");

        let eth = &decisions["ETH/USDT"];
        assert!(!eth.valid);
    }

    #[test]
    fn test_missing_section_is_invalid() {
        let parser = create_test_parser();
        let text = "【BTC/USDT】\ndirection: sell\n";
        let decisions = parser.parse(text, &symbols(&["BTC/USDT", "SOL/USDT"]));

        assert_eq!(decisions["BTC/USDT"].action, TradeAction::Sell);
        assert!(!decisions["SOL/USDT"].valid);
        assert!(decisions["SOL/USDT"].reason.contains("SOL/USDT"));
    }

    #[test]
    fn test_localized_and_english_equivalent() {
        let parser = create_test_parser();
        let zh = parser.parse_block("BTC/USDT", "方向：做空\n");
        let en = parser.parse_block("BTC/USDT", "Direction: SELL\n");
        assert_eq!(zh.action, TradeAction::Sell);
        assert_eq!(en.action, TradeAction::Sell);
    }

    #[test]
    fn test_field_beats_phrase() {
        let parser = create_test_parser();
        let block = "分析师建议做多，但风险偏高\n**最终决策**: hold\n";
        let decision = parser.parse_block("BTC/USDT", block);
        assert_eq!(decision.action, TradeAction::Hold);
    }

    #[test]
    fn test_unknown_field_value_is_invalid() {
        let parser = create_test_parser();
        let decision = parser.parse_block("BTC/USDT", "action: moon\n");
        assert!(!decision.valid);
        assert!(decision.reason.contains("moon"));
    }

    #[test]
    fn test_phrase_fallback() {
        let parser = create_test_parser();
        assert_eq!(
            parser.parse_block("X/USDT", "We recommend buying on the dip").action,
            TradeAction::Buy
        );
        assert_eq!(
            parser.parse_block("X/USDT", "综合来看建议平多仓锁定利润").action,
            TradeAction::CloseLong
        );
        assert_eq!(
            parser.parse_block("X/USDT", "短期内继续观望").action,
            TradeAction::Hold
        );
    }

    #[test]
    fn test_negated_recommendation_skipped() {
        let parser = create_test_parser();
        let decision = parser.parse_block("X/USDT", "不建议做多，建议观望等待回调");
        assert_eq!(decision.action, TradeAction::Hold);
    }

    #[test]
    fn test_negated_direction_never_opens() {
        let parser = create_test_parser();
        for text in [
            "不建议做多",
            "建议不要做多，风险太高",
            "We recommend not to buy here",
            "Do not go long into resistance",
        ] {
            let decision = parser.parse_block("X/USDT", text);
            assert!(!decision.valid, "{} parsed as {}", text, decision.action);
        }
    }

    #[test]
    fn test_unrelated_negation_keeps_direction() {
        let parser = create_test_parser();
        assert_eq!(
            parser.parse_block("X/USDT", "风险不大，建议做多").action,
            TradeAction::Buy
        );
        assert_eq!(
            parser.parse_block("X/USDT", "建议做多，不要追高").action,
            TradeAction::Buy
        );
        assert_eq!(
            parser.parse_block("X/USDT", "不建议操作").action,
            TradeAction::Hold
        );
    }

    #[test]
    fn test_no_direction_is_invalid() {
        let parser = create_test_parser();
        let decision = parser.parse_block("X/USDT", "Volume is flat and funding is neutral.");
        assert!(!decision.valid);
    }

    #[test]
    fn test_numeric_defaults_to_zero() {
        let parser = create_test_parser();
        let decision = parser.parse_block("BTC/USDT", "decision: buy");
        assert!(decision.valid);
        assert_eq!(decision.confidence, dec!(0));
        assert_eq!(decision.leverage, 0);
        assert_eq!(decision.position_size_pct, dec!(0));
        assert_eq!(decision.stop_loss, None);
    }

    #[test]
    fn test_confidence_percent_normalized() {
        let parser = create_test_parser();
        let decision = parser.parse_block("BTC/USDT", "decision: buy\n信心: 78.5%");
        assert_eq!(decision.confidence, dec!(0.785));
    }

    #[test]
    fn test_leverage_out_of_range_ignored() {
        let parser = create_test_parser();
        let decision = parser.parse_block("BTC/USDT", "decision: buy\nleverage: 200");
        assert_eq!(decision.leverage, 0);
        let decision = parser.parse_block("BTC/USDT", "decision: buy, use 12倍杠杆");
        assert_eq!(decision.leverage, 12);
    }

    #[test]
    fn test_position_size_patterns() {
        let parser = create_test_parser();
        let decision = parser.parse_block("BTC/USDT", "decision: buy\n仓位建议: 40%资金");
        assert_eq!(decision.position_size_pct, dec!(40));
        let decision = parser.parse_block("BTC/USDT", "decision: buy\n使用 25% 的资金");
        assert_eq!(decision.position_size_pct, dec!(25));
        let decision = parser.parse_block("BTC/USDT", "decision: buy\nposition size: 150%");
        assert_eq!(decision.position_size_pct, dec!(0));
    }

    #[test]
    fn test_reason_fallback_first_long_line() {
        let parser = create_test_parser();
        let block = "# header\ndecision: sell\n**Momentum has rolled over on the four hour chart**\n";
        let decision = parser.parse_block("BTC/USDT", block);
        assert_eq!(decision.reason, "Momentum has rolled over on the four hour chart");
    }

    #[test]
    fn test_final_section_excludes_analysis() {
        let parser = create_test_parser();
        let text = "## 分析\n【BTC/USDT】 建议做多\n\n## 最终决策\n【BTC/USDT】\n方向: close_long\n";
        let decisions = parser.parse(text, &symbols(&["BTC/USDT"]));
        assert_eq!(decisions["BTC/USDT"].action, TradeAction::CloseLong);
    }

    #[test]
    fn test_bold_symbol_blocks() {
        let parser = create_test_parser();
        let text = "**BTC/USDT**\naction: buy\n**ETH/USDT**\naction: sell\n";
        let decisions = parser.parse(text, &symbols(&["BTC/USDT", "ETH/USDT"]));
        assert_eq!(decisions["BTC/USDT"].action, TradeAction::Buy);
        assert_eq!(decisions["ETH/USDT"].action, TradeAction::Sell);
    }

    #[test]
    fn test_base_symbol_header() {
        let parser = create_test_parser();
        let decisions = parser.parse("【ETH】\n交易方向: 平空\n", &symbols(&["ETH/USDT"]));
        assert_eq!(decisions["ETH/USDT"].action, TradeAction::CloseShort);
    }

    #[test]
    fn test_json_multi_symbol() {
        let parser = create_test_parser();
        let text = r#"{
            "BTC/USDT": {"action": "HOLD", "stop_loss": 90000, "new_stop_loss": 96000, "stop_loss_reason": "trail to breakeven"},
            "ETH/USDT": {"action": "SELL", "confidence": 70, "leverage": 8, "position_size": 30, "reasoning": "lower high"}
        }"#;
        let decisions = parser.parse(text, &symbols(&["BTC/USDT", "ETH/USDT", "SOL/USDT"]));

        let btc = &decisions["BTC/USDT"];
        assert_eq!(btc.action, TradeAction::Hold);
        assert_eq!(btc.stop_loss, Some(dec!(96000)));
        assert_eq!(btc.reason, "trail to breakeven");

        let eth = &decisions["ETH/USDT"];
        assert_eq!(eth.action, TradeAction::Sell);
        assert_eq!(eth.confidence, dec!(0.7));
        assert_eq!(eth.leverage, 8);
        assert_eq!(eth.position_size_pct, dec!(30));

        assert!(!decisions["SOL/USDT"].valid);
    }

    #[test]
    fn test_json_single_object() {
        let parser = create_test_parser();
        let text = r#"{"symbol": "BTCUSDT", "action": "close_short", "summary": "target hit"}"#;
        let decisions = parser.parse(text, &symbols(&["BTC/USDT"]));
        assert_eq!(decisions["BTC/USDT"].action, TradeAction::CloseShort);
        assert_eq!(decisions["BTC/USDT"].reason, "target hit");
    }

    #[test]
    fn test_json_unknown_action_invalid() {
        let parser = create_test_parser();
        let text = r#"{"symbol": "BTC/USDT", "action": "YOLO"}"#;
        let decisions = parser.parse(text, &symbols(&["BTC/USDT"]));
        assert!(!decisions["BTC/USDT"].valid);
    }

    #[test]
    fn test_broken_json_falls_back_to_text() {
        let parser = create_test_parser();
        let text = "{ not json\n【BTC/USDT】 decision: buy";
        let decisions = parser.parse(text, &symbols(&["BTC/USDT"]));
        assert_eq!(decisions["BTC/USDT"].action, TradeAction::Buy);
    }
}
