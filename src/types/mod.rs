pub mod analysis;
pub mod chart;
pub mod order;
pub mod sheet;

pub use analysis::*;
pub use chart::*;
pub use order::*;
pub use sheet::*;
