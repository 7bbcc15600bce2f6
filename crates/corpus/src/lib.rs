//! The archive corpus and its query engine.
//!
//! [`Apps::init`] reads the lock file written by acquisition and exposes
//! the successful apps as a lazy, parallel query pipeline. Per-app work
//! always runs inside a scoped archive session ([`App::scope`]) so file
//! handles are released deterministically on every exit path.

mod app;
mod datum;
mod materialize;
mod query;
mod session;

pub use app::App;
pub use datum::Datum;
pub use materialize::{new_table, ChartData};
pub use query::{column, group_column, AppFn, AppGroups, Apps, GroupFn};
pub use session::Session;

/// Default worker-pool width: the corpus is I/O bound on archive reads.
pub const DEFAULT_POOL_SIZE: usize = 100;
