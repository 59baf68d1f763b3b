//! Benchmarks for decision text parsing

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use perp_guard::decision::DecisionParser;

const MULTI_SYMBOL: &str = "## 市场分析\n\
    BTC 在 64000 附近整理，成交量放大。\n\n\
    ## 最终决策\n\
    【BTC/USDT】\n\
    **方向**: 做多\n\
    **置信度**: 0.75\n\
    **杠杆**: 10\n\
    **仓位建议**: 15%\n\
    **止损**: 62500\n\
    **止盈**: 68000\n\
    **理由**: 突破整理区间上沿\n\n\
    【ETH/USDT】\n\
    建议观望，等待方向明确\n\n\
    【SOL/USDT】\n\
    Decision: SELL\n\
    Stop loss: 152.5\n";

fn symbols() -> Vec<String> {
    ["BTC/USDT", "ETH/USDT", "SOL/USDT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn benchmark_parse_multi_symbol(c: &mut Criterion) {
    let parser = DecisionParser::new().unwrap();
    let symbols = symbols();

    c.bench_function("parse_multi_symbol", |b| {
        b.iter(|| parser.parse(black_box(MULTI_SYMBOL), black_box(&symbols)))
    });
}

fn benchmark_parse_keyword_only(c: &mut Criterion) {
    let parser = DecisionParser::new().unwrap();
    let symbols = vec!["BTC/USDT".to_string()];
    let text = "【BTC/USDT】\n综合来看短期动能偏弱，不建议追高，建议持有现有仓位。\n";

    c.bench_function("parse_keyword_only", |b| {
        b.iter(|| parser.parse(black_box(text), black_box(&symbols)))
    });
}

criterion_group!(
    benches,
    benchmark_parse_multi_symbol,
    benchmark_parse_keyword_only
);
criterion_main!(benches);
