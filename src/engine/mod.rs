//! Pure WAC arithmetic and the calc-request processing engine.

pub mod calculator;
pub mod wac;

pub use calculator::{CalcEngine, CalcError, CalcOutcome};
pub use wac::{WacState, WAC_PRICE_SCALE};
