pub mod board;
pub mod locks;
pub mod placement;
pub mod query;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use board::{Board, MapFeed, MapView};
pub use locks::AddressLocks;
pub use placement::{
    validate_address, PlacementError, PlacementOutcome, PlacementPlan, PlacementPlanner,
    PlacementService,
};
pub use query::{FilterSpec, PostQuery, QueryEngine, QueryParams, Scope, SortSpec, ViewerContext};
pub use store::PostStore;
