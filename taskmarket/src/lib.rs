pub mod chain;
pub mod cli;
pub mod config;
pub mod market_rpc;
pub mod models;
pub mod payout;
pub mod repo;
pub mod resource;
pub mod service;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testutil;
