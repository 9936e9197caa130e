//! Order execution: cost model, signal conversion, routing and matching

pub mod cost;
pub mod handler;

pub use cost::{
    CommissionTable, CostModel, LinearSlippage, SlippageModel, SqrtSlippage, TransactionCost,
    DEFAULT_AVG_DAILY_VOLUME,
};
pub use handler::{ExecutionHandler, OrderRouter, OrderSizer, RunRecorder, SharedBooks};
