//! Full trading cycles from decision text

mod common;

use common::{create_test_config, create_test_harness};
use perp_guard::decision::TradeAction;
use perp_guard::engine::{DecisionSource, FileDecisionSource};
use perp_guard::stoploss::{PositionState, StopTrigger};
use perp_guard::storage::Storage;
use rust_decimal_macros::dec;
use tokio::sync::watch;

#[tokio::test]
async fn test_one_symbol_failure_does_not_stop_others() {
    let h = create_test_harness(create_test_config(&["BTC/USDT", "ETH/USDT"], "10")).await;
    // no ETH mark on the paper exchange, so ETH cannot be priced
    let text = "## 最终决策\n\
        【BTC/USDT】\n方向: 做多\n置信度: 0.8\n理由: 突破前高\n\
        【ETH/USDT】\n方向: 做多\n理由: 跟随\n";

    let report = h.cycle.run_once(text).await;
    assert_eq!(report.results.len(), 2);

    let btc = &report.results["BTC/USDT"];
    assert!(btc.success, "{}", btc.message);
    assert_eq!(btc.action, TradeAction::Buy);
    // 10,000 / 2 symbols × 0.30 × 10% × 10x / 100
    assert_eq!(btc.amount, dec!(15));

    let eth = &report.results["ETH/USDT"];
    assert!(!eth.success);
    assert!(eth.message.starts_with("Exchange error"), "{}", eth.message);

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(h.cycle.stop_loss().len().await, 1);

    let doc = h.storage.snapshot().await;
    assert_eq!(doc.sessions.len(), 2);
    assert!(doc.sessions.iter().any(|s| s.symbol == "BTC/USDT" && s.executed));
    assert!(doc.sessions.iter().any(|s| s.symbol == "ETH/USDT" && !s.executed));
    assert!(doc.balance_history.len() >= 2);
}

#[tokio::test]
async fn test_missing_direction_degrades_symbol_only() {
    let h = create_test_harness(create_test_config(&["BTC/USDT", "ETH/USDT"], "10")).await;
    let text = "【BTC/USDT】\n**交易方向**: BUY\n\
        【ETH/USDT】\n市场情绪中性，暂无明确判断\n";

    let report = h.cycle.run_once(text).await;
    assert!(report.results["BTC/USDT"].success);

    let eth = &report.results["ETH/USDT"];
    assert!(!eth.success);
    assert!(eth.message.starts_with("Parse error"), "{}", eth.message);
}

#[tokio::test]
async fn test_hold_with_new_stop_from_text() {
    let h = create_test_harness(create_test_config(&["BTC/USDT"], "10")).await;
    h.cycle.run_once("【BTC/USDT】\n方向: BUY\n").await;

    let report = h
        .cycle
        .run_once("【BTC/USDT】\n方向: HOLD\n新止损: 99\n理由: 上移止损保护利润\n")
        .await;
    let result = &report.results["BTC/USDT"];
    assert!(result.success);
    assert!(!result.traded());

    let position = h.cycle.stop_loss().get_position("BTC/USDT").await.unwrap();
    assert_eq!(position.current_stop_loss, dec!(99));
    assert_eq!(position.stop_loss_history[0].reason, "上移止损保护利润");
}

#[tokio::test]
async fn test_unprotected_position_reprotected_next_cycle() {
    let h = create_test_harness(create_test_config(&["BTC/USDT"], "10")).await;
    h.cycle.run_once("【BTC/USDT】\n方向: BUY\n").await;

    h.exchange.reject_orders(true).await;
    h.cycle
        .run_once("【BTC/USDT】\n方向: HOLD\n新止损: 99\n")
        .await;
    let position = h.cycle.stop_loss().get_position("BTC/USDT").await.unwrap();
    assert_eq!(position.state, PositionState::Open);
    assert_eq!(position.current_stop_loss, dec!(99));
    assert!(h.exchange.stop_orders().await.is_empty());

    h.exchange.reject_orders(false).await;
    let report = h.cycle.run_once("【BTC/USDT】\n方向: 观望\n").await;
    assert_eq!(report.reprotected, 1);

    let position = h.cycle.stop_loss().get_position("BTC/USDT").await.unwrap();
    assert_eq!(position.state, PositionState::Protected);
    let orders = h.exchange.stop_orders().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].stop_price, dec!(99));
}

#[tokio::test]
async fn test_stop_fired_on_exchange_is_closed_next_cycle() {
    let h = create_test_harness(create_test_config(&["BTC/USDT"], "10")).await;
    h.cycle.run_once("【BTC/USDT】\n方向: BUY\n").await;
    let id = h.cycle.stop_loss().get_position("BTC/USDT").await.unwrap().id;

    h.exchange.set_mark_price("BTC/USDT", dec!(97)).await;
    h.cycle.run_once("【BTC/USDT】\n方向: HOLD\n").await;

    assert!(h.cycle.stop_loss().is_empty().await);
    let record = h.storage.get_position(&id).await.unwrap().unwrap();
    assert!(record.closed);
    assert_eq!(
        record.close_reason.as_deref(),
        Some("stop-loss triggered on exchange")
    );
    // recorded at the stop the exchange filled, not at entry
    let stop_fill = h.exchange.fills().await.pop().unwrap();
    assert_eq!(stop_fill.price, dec!(97.5));
    assert_eq!(record.close_price, Some(dec!(97.5)));
    assert_eq!(record.realized_pnl, Some(dec!(-75)));
}

#[tokio::test]
async fn test_run_once_from_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("decision.txt");
    std::fs::write(&path, "【BTC/USDT】\n方向: 做多\n").unwrap();

    let h = create_test_harness(create_test_config(&["BTC/USDT"], "10")).await;
    let source = FileDecisionSource::new(&path);
    let (_tx, rx) = watch::channel(false);

    h.cycle.run(&source, true, rx).await.unwrap();
    assert_eq!(h.cycle.stop_loss().len().await, 1);
    // the same text is not executed twice
    assert!(source.next_decision().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unchanged_decision_still_reprotects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("decision.txt");
    std::fs::write(&path, "【BTC/USDT】\n方向: 做多\n").unwrap();

    let h = create_test_harness(create_test_config(&["BTC/USDT"], "10")).await;
    let source = FileDecisionSource::new(&path);
    assert!(h.cycle.tick(&source).await.is_some());

    h.exchange.reject_orders(true).await;
    let _ = h
        .cycle
        .stop_loss()
        .update_stop_loss("BTC/USDT", dec!(99), "tighten", StopTrigger::Decision)
        .await;
    assert_eq!(
        h.cycle.stop_loss().get_position("BTC/USDT").await.unwrap().state,
        PositionState::Open
    );
    h.exchange.reject_orders(false).await;

    // same file content: no new cycle, but the stop is placed again
    assert!(h.cycle.tick(&source).await.is_none());
    let position = h.cycle.stop_loss().get_position("BTC/USDT").await.unwrap();
    assert_eq!(position.state, PositionState::Protected);
    assert_eq!(h.exchange.stop_orders().await[0].stop_price, dec!(99));
}
