//! Prometheus metrics

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Total account balance
    TotalBalance,
    /// Balance available for new margin
    AvailableBalance,
    /// Unrealized P&L across tracked positions
    UnrealizedPnl,
    /// Tracked open position count
    OpenPositions,
    /// Aggregate notional exposure
    TotalExposure,
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Executions that reached the exchange successfully
    ExecutionSuccess,
    /// Executions that failed or were rejected
    ExecutionFailure,
    /// Accepted stop-loss moves
    StopLossUpdates,
    /// Positions closed
    PositionsClosed,
    /// Storage writes that failed
    PersistenceWarnings,
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            GaugeMetric::TotalBalance => "perpguard_total_balance_usd",
            GaugeMetric::AvailableBalance => "perpguard_available_balance_usd",
            GaugeMetric::UnrealizedPnl => "perpguard_unrealized_pnl_usd",
            GaugeMetric::OpenPositions => "perpguard_open_positions",
            GaugeMetric::TotalExposure => "perpguard_total_exposure_usd",
        }
    }
}

impl CounterMetric {
    fn name(self) -> &'static str {
        match self {
            CounterMetric::ExecutionSuccess => "perpguard_executions_success_total",
            CounterMetric::ExecutionFailure => "perpguard_executions_failure_total",
            CounterMetric::StopLossUpdates => "perpguard_stop_loss_updates_total",
            CounterMetric::PositionsClosed => "perpguard_positions_closed_total",
            CounterMetric::PersistenceWarnings => "perpguard_persistence_warnings_total",
        }
    }
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let name = metric.name();
    ::metrics::gauge!(name).set(value);
    tracing::trace!(metric = name, value = value, "Setting gauge");
}

/// Increment a counter, labelled by symbol
pub fn increment_counter(metric: CounterMetric, symbol: &str) {
    ::metrics::counter!(metric.name(), "symbol" => symbol.to_string()).increment(1);
}
