pub mod achievements;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod normalize;
pub mod queue;
pub mod session;
pub mod side_effects;
pub mod worker;
