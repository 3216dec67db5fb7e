//! Domain types shared by every layer of the pipeline.

pub mod direction;
pub mod ids;
pub mod observation;

pub use direction::Direction;
pub use ids::LayerRunId;
pub use observation::{is_month_end, CurrencyPair, Observation};

/// Forecast horizon in rows, fixed for the h7 model family.
pub const HORIZON: usize = 7;

/// Horizon tag used in file names and config (`h7`).
pub const HORIZON_TAG: &str = "h7";
