//! Throttling engine: counter store, policies, limiters, bypass, sweeper.

mod clock;
mod store;
mod context;
mod key;
mod policy;
mod limiter;
mod bypass;
mod sweeper;
pub mod presets;

pub use clock::{Clock, MockClock, SystemClock};
pub use store::{CounterStore, MemoryStore, WindowState};
pub use context::RequestContext;
pub use key::{KeyStrategy, FALLBACK_IDENTITY};
pub use policy::{skip_for_role, Policy, SkipPredicate};
pub use limiter::{Decision, Gate, Limiter, TieredLimiter};
pub use bypass::{TrustField, TrustRule, TrustRuleConfig, TrustRules};
pub use sweeper::{Sweeper, SweeperHandle, DEFAULT_SWEEP_INTERVAL};
