//! Provider Adapters
//!
//! Concrete `ProviderAdapter` implementations and the registry the
//! multiplexer builds them from:
//!
//! - **Registry**: name to constructor map (`ProviderFactory`)
//! - **Simulated**: random-walk ticks and synthetic historic bars
//! - **Mock**: recording adapter with injectable failures

pub mod mock;
pub mod registry;
pub mod simulated;

pub use mock::{MockBehavior, MockProvider, MockProviderFactory};
pub use registry::{ProviderConstructor, ProviderRegistry};
pub use simulated::{MAX_HISTORIC_BARS, SIMULATED, SimulatedProvider};
