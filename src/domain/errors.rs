use thiserror::Error;

/// Errors raised while accepting a webhook, before any job exists.
///
/// The HTTP layer maps these to response codes: schema and auth problems are
/// client errors (4xx), store failures are 500 so the caller retries the
/// whole webhook and the dedup key absorbs the replay.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("invalid_json")]
    InvalidJson,

    #[error("bad_passphrase")]
    BadPassphrase,

    #[error("bad_header_token")]
    BadHeaderToken,

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("invalid_schema: {0}")]
    InvalidSchema(String),

    #[error("store_error: {0}")]
    Store(anyhow::Error),
}

/// Reasons the risk guard refuses a new entry.
///
/// The `Display` form is the stable reason string recorded on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RiskBlock {
    #[error("trading_disabled")]
    TradingDisabled,

    #[error("daily_drawdown_limit_reached")]
    DailyDrawdownLimitReached,

    #[error("daily_loss_cap_reached")]
    DailyLossCapReached,

    #[error("max_positions_total_reached")]
    MaxPositionsTotalReached,
}

/// Errors raised while executing a claimed queue job.
///
/// Every variant except `Transient` is terminal: the job is marked `failed`
/// with the `Display` form as its reason and is never retried. `Transient`
/// feeds the retry/backoff path bounded by the retry budget, then the DLQ.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("mode_mismatch: {0}")]
    ModeMismatch(String),

    #[error("market_closed")]
    MarketClosed,

    #[error(transparent)]
    Risk(#[from] RiskBlock),

    #[error("not_holding: {symbol}")]
    NotHolding { symbol: String },

    #[error("no_price_data: {symbol}")]
    NoPriceData { symbol: String },

    #[error("invalid_order: {0}")]
    InvalidOrder(String),

    #[error("broker_rejected: {0}")]
    BrokerRejected(String),

    #[error("transient: {0}")]
    Transient(String),
}

impl ExecError {
    /// Fatal errors skip the retry path entirely.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExecError::Transient(_))
    }
}

/// Failures surfaced by the broker client.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker understood the request and refused it (4xx).
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A previous submission with the same client_order_id already exists.
    /// The worker treats this as success (idempotent replay).
    #[error("client_order_id already exists")]
    AlreadyExists,

    /// Network failure, timeout, or broker 5xx.
    #[error("transport: {0}")]
    Transport(String),
}

impl From<BrokerError> for ExecError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Rejected { message, .. } => ExecError::BrokerRejected(message),
            BrokerError::AlreadyExists => {
                ExecError::BrokerRejected("client_order_id already exists".to_string())
            }
            BrokerError::Transport(msg) => ExecError::Transient(msg),
        }
    }
}
