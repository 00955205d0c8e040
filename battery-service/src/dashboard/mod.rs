//! Read-only web dashboard over the latest snapshot.
//!
//! `filter` and `view` are pure: the same snapshot and filter state always
//! produce the same view. `server` wires them to HTTP.

pub mod filter;
pub mod server;
pub mod view;

pub use filter::{FilterEvent, FilterRangeError, FilterState, RangeFilter, Selection, UNSPECIFIED};
pub use server::{router, serve, AppState};
pub use view::{compute_view, filter_options, FilteredView, Summary, ViewOptions};
