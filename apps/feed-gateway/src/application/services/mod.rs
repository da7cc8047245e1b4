//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SessionMultiplexer`: provider lifecycle and reference-counted registries
//! - `Dispatcher`: routes provider events and completed bars to strategies
//! - `CommandRouter`: per-provider ordering of client commands

mod command_router;
mod dispatch;
mod error;
mod multiplexer;
mod session;

pub use command_router::CommandRouter;
pub use dispatch::Dispatcher;
pub use error::GatewayError;
pub use multiplexer::{SessionHandle, SessionMultiplexer};
pub use session::{LiveBarSnapshot, ProviderSession, ProviderSnapshot, SubscriptionSnapshot};
