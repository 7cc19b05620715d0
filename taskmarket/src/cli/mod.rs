mod agents;
mod applications;
mod payouts;
mod tasks;
mod utils;

pub use agents::*;
pub use applications::*;
pub use payouts::*;
pub use tasks::*;
