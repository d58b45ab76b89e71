//! Cross-shard query execution
//!
//! Bounded parallel fan-out across regions (`QueryOptimizer`), key-aware
//! plan selection (`QueryPlanner`) and a TTL result cache (`QueryCache`).

mod cache;
mod optimizer;
mod planner;

pub use cache::{CacheStats, QueryCache};
pub use optimizer::QueryOptimizer;
pub use planner::QueryPlanner;
