//! AODV routing state
//!
//! - `sequence`: wrap-aware freshness comparison and the node's own counters
//! - `entry`: forward route and route request entries with soft deadlines
//! - `forward_table` / `request_table`: the two expiring tables
//! - `manager`: ties the tables together and runs the expiry loop

pub mod entry;
pub mod forward_table;
pub(crate) mod manager;
pub mod request_table;
pub mod sequence;

pub use entry::{EntryError, ForwardRouteEntry, RequestKey, RouteEntry, RouteRequestEntry};
pub use forward_table::{ForwardRouteTable, RouteLookup, RouteSnapshot};
pub use request_table::{RequestSnapshot, RouteRequestTable};
pub use sequence::{is_at_least_as_fresh, is_better, max_sequence_number, NodeCounters};
