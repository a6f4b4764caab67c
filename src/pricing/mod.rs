//! USD price resolution.
//!
//! - [`math`]: Q96 fixed-point conversions, no floating point anywhere
//! - [`engine`]: the per-cycle seed/resolve/statistics pipeline

pub mod engine;
pub mod math;

pub use engine::{CycleReport, PriceResolutionEngine, PriceSource};
pub use math::{liquidity_to_amounts, sqrt_price_x96_to_inverse_price, sqrt_price_x96_to_price};
