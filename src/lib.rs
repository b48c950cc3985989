pub mod amount;
pub mod baseline;
pub mod bootstrap;
pub mod config;
pub mod csv;
pub mod engine;
pub mod model;
pub mod origin;
pub mod publisher;
pub mod score;
pub mod store;
pub mod velocity;

pub use amount::Amount;
pub use config::Config;
pub use engine::{Decision, Outcome, Reply, RiskEngine};
pub use model::{AccountStatus, Attempt, RiskLevel, UserId};
pub use origin::Origin;
