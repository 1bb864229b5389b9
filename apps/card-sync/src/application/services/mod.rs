//! Application Services
//!
//! - [`coordinator::CardCoordinator`]: fetch, cache and render cards
//! - [`pending::PendingRefreshSupervisor`]: follow refresh-pending cards to completion
//! - [`watchlist::WatchlistRotation`]: share the active context across watched tickers

pub mod coordinator;
pub mod pending;
pub mod watchlist;

pub use coordinator::{CardCoordinator, CoordinatorConfig, FetchOptions, FetchSource};
pub use pending::{PendingConfig, PendingRefreshSupervisor, PollVerdict};
pub use watchlist::WatchlistRotation;
