pub mod api;
pub mod mock;

pub use api::{Callback, ListenerId, NodeApi, NodeEvent, NodeListener, PoolDifference, QueryBlocksResponse};
pub use mock::{MockCurrency, MockNode};
