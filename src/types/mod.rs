pub mod backtest;
pub mod cluster;
pub mod outcome;
pub mod quality;
pub mod signal;

pub use backtest::*;
pub use cluster::*;
pub use outcome::*;
pub use quality::*;
pub use signal::*;
