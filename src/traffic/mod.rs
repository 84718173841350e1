pub mod config;
pub mod driver;
pub mod patterns;

pub use config::{TrafficConfig, TrafficPatternSpec};
pub use driver::{CoreDriver, DriverStats};
pub use patterns::{CompiledPattern, PatternOp};
