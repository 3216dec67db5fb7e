//! fxsignal core: the pure and storage-facing pieces of the daily FX pipeline.
//!
//! - Domain types (observations, currency pairs, directions, layer run ids)
//! - Decision policy mapping `p_up` to UP / DOWN / SIDEWAYS with confidence
//! - Leak-free h7 feature builder
//! - Bronze → silver → gold layer engine with watermarks over an object store
//! - Upstream rate provider with bounded retry

pub mod data;
pub mod domain;
pub mod features;
pub mod policy;
pub mod synthetic;
