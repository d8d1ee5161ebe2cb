//! Typed records stored in the graph

mod edge;
mod facet;
mod node;
mod sync;

pub use edge::{Edge, EdgeType};
pub use facet::Facet;
pub use node::Node;
pub use sync::{SyncState, SyncStatus, SYNC_STATE_ID};
