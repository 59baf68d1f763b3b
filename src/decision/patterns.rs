//! Ordered pattern tables for decision text
//!
//! Every table is evaluated top to bottom and the first hit wins. Explicit
//! fields are tried before recommendation phrases, and recommendation
//! phrases before bare keywords.

use super::TradeAction;
use regex::Regex;

/// Values accepted after an explicit direction field
const ACTION_VALUE: &str = r"([a-z_]+|平多|平空|做多|做空|开多|开空|买入|卖出|观望|持有)";

/// Explicit direction fields, localized first
const FIELD_PATTERNS: &[&str] = &[
    r"(?i)\*{0,2}(?:最终决策|决策方向|交易方向|方向)\*{0,2}\s*[：:]\s*\*{0,2}\s*",
    r"(?i)\*{0,2}\b(?:decision|action|direction)\*{0,2}\s*[：:]\s*\*{0,2}\s*",
];

/// Phrases that recommend an action, checked before bare keywords
const RECOMMENDATION_PHRASES: &[(TradeAction, &[&str])] = &[
    (
        TradeAction::CloseLong,
        &[r"建议.*?平多", r"建议.*?平掉多单", r"(?i)recommend.*?close.*?long"],
    ),
    (
        TradeAction::CloseShort,
        &[r"建议.*?平空", r"建议.*?平掉空单", r"(?i)recommend.*?close.*?short"],
    ),
    (
        TradeAction::Buy,
        &[
            r"建议.*?做多",
            r"建议.*?买入",
            r"建议.*?开多",
            r"(?i)\baction\b.*?\bbuy",
            r"(?i)(?:recommend|suggest).*?\bbuy",
            r"(?i)\bdecision\b.*?\bbuy",
        ],
    ),
    (
        TradeAction::Sell,
        &[
            r"建议.*?做空",
            r"建议.*?卖出",
            r"建议.*?开空",
            r"(?i)\baction\b.*?\bsell",
            r"(?i)(?:recommend|suggest).*?\bsell",
            r"(?i)\bdecision\b.*?\bsell",
        ],
    ),
    (
        TradeAction::Hold,
        &[
            r"建议.*?观望",
            r"建议.*?持有",
            r"建议.*?等待",
            r"(?i)\baction\b.*?\bhold",
            r"(?i)(?:recommend|suggest).*?\b(?:hold|wait)",
            r"(?i)\bdecision\b.*?\bhold",
            r"不建议操作",
        ],
    ),
];

/// Bare keywords, the loosest tier
const KEYWORD_PHRASES: &[(TradeAction, &[&str])] = &[
    (
        TradeAction::CloseLong,
        &[r"(?i)\bclose\b.*?\blong\b", r"平多仓", r"平掉多头", r"平多"],
    ),
    (
        TradeAction::CloseShort,
        &[r"(?i)\bclose\b.*?\bshort\b", r"平空仓", r"平掉空头", r"平空"],
    ),
    (
        TradeAction::Buy,
        &[r"做多", r"开多仓", r"买入", r"(?i)\bgo long\b"],
    ),
    (
        TradeAction::Sell,
        &[r"做空", r"开空仓", r"卖出", r"(?i)\bgo short\b"],
    ),
    (TradeAction::Hold, &[r"观望", r"持有", r"(?i)\bhold\b"]),
];

const NUMBER: &str = r"([0-9]+(?:\.[0-9]+)?)";
const PRICE: &str = r"\$?\s*([0-9][0-9,]*(?:\.[0-9]+)?)";

const CONFIDENCE_FIELDS: &[&str] = &[r"置信度", r"(?i)confidence", r"信心"];

const LEVERAGE_PATTERNS: &[&str] = &[
    r"杠杆倍数\*{0,2}[：:\s]*\*{0,2}\s*([0-9]+)",
    r"杠杆\*{0,2}[：:\s]*\*{0,2}\s*([0-9]+)",
    r"(?i)leverage\*{0,2}[：:\s]*\*{0,2}\s*([0-9]+)",
    r"(?i)\b([0-9]+)x\b",
    r"([0-9]+)倍杠杆",
];

/// Most specific first so "止损价格" is not read as "止损价"
const STOP_LOSS_FIELDS: &[&str] = &[
    r"止损价格",
    r"止损价",
    r"止损点",
    r"初始止损",
    r"新止损",
    r"(?i)stop[-\s]?loss\s*price",
    r"(?i)stop[-\s]?loss",
];

const POSITION_SIZE_PATTERNS: &[&str] = &[
    r"\*{0,2}仓位建议\*{0,2}[：:\s]*([0-9]+(?:\.[0-9]+)?)\s*%",
    r"\*{0,2}建议仓位\*{0,2}[：:\s]*([0-9]+(?:\.[0-9]+)?)\s*%",
    r"(?i)\*{0,2}position\s*size\*{0,2}[：:\s]*([0-9]+(?:\.[0-9]+)?)\s*%",
    r"使用\s*([0-9]+(?:\.[0-9]+)?)\s*%\s*(?:的)?资金",
    r"([0-9]+(?:\.[0-9]+)?)\s*%\s*资金",
];

const REASON_FIELDS: &[&str] = &[r"理由", r"原因", r"入场理由", r"(?i)\breason\b"];

/// Headers that introduce the final decision section
const SECTION_PATTERNS: &[&str] = &[
    r"(?si)##\s*最终决策[：:\s]*(.*)",
    r"(?si)##\s*交易决策[：:\s]*(.*)",
    r"(?si)##\s*final\s*decision[：:\s]*(.*)",
    r"(?si)##\s*决策[：:\s]*(.*)",
];

/// Compiled pattern tables
#[derive(Debug, Clone)]
pub(super) struct PatternSet {
    pub fields: Vec<Regex>,
    pub recommendations: Vec<(TradeAction, Vec<Regex>)>,
    pub keywords: Vec<(TradeAction, Vec<Regex>)>,
    pub confidence: Vec<Regex>,
    pub leverage: Vec<Regex>,
    pub stop_loss: Vec<Regex>,
    pub position_size: Vec<Regex>,
    pub reason: Vec<Regex>,
    pub sections: Vec<Regex>,
}

impl PatternSet {
    pub fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            fields: FIELD_PATTERNS
                .iter()
                .map(|p| Regex::new(&format!("{}{}", p, ACTION_VALUE)))
                .collect::<Result<_, _>>()?,
            recommendations: compile_table(RECOMMENDATION_PHRASES)?,
            keywords: compile_table(KEYWORD_PHRASES)?,
            confidence: labelled(CONFIDENCE_FIELDS, NUMBER)?,
            leverage: compile_all(LEVERAGE_PATTERNS)?,
            stop_loss: labelled(STOP_LOSS_FIELDS, PRICE)?,
            position_size: compile_all(POSITION_SIZE_PATTERNS)?,
            reason: labelled(REASON_FIELDS, r"([^\n]+)")?,
            sections: compile_all(SECTION_PATTERNS)?,
        })
    }
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p)).collect()
}

fn compile_table(
    table: &[(TradeAction, &[&str])],
) -> Result<Vec<(TradeAction, Vec<Regex>)>, regex::Error> {
    table
        .iter()
        .map(|(action, patterns)| Ok((*action, compile_all(patterns)?)))
        .collect()
}

/// `label` optionally bolded, a separator, then `value`
fn labelled(labels: &[&str], value: &str) -> Result<Vec<Regex>, regex::Error> {
    labels
        .iter()
        .map(|label| Regex::new(&format!(r"\*{{0,2}}{}\*{{0,2}}[：:\s]*{}", label, value)))
        .collect()
}
