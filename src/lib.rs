//! Paper-trading bot for Bybit USDT perpetuals: indicator signals, simulated
//! fills with stop-loss / take-profit / trailing stop, a persistent ledger with
//! risk halts, and Telegram notifications.

pub mod bybit_api;
pub mod commands;
pub mod config;
pub mod engine;
pub mod indicators;
pub mod ledger;
pub mod position_manager;
pub mod signal;
pub mod state_store;
pub mod telegram;
pub mod types;
