//! Trading core: the grid model, position state machine, and the price
//! oracle stack.

pub mod chainlink_feed;
pub mod grid;
pub mod position;
pub mod price_oracle;
pub mod uniswap_twap;

pub use grid::GridSettings;
pub use position::{GridStats, Position, PositionStatus};
pub use price_oracle::{PriceData, PriceOracle, PriceSource};
