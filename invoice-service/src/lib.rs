//! Invoice Service - Inter-team invoice ledger with payment submission settlement.

pub mod config;
pub mod models;
pub mod query;
pub mod services;
pub mod startup;
pub mod store;
