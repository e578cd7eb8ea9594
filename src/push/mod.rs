//! Push delivery of value updates to registered cache entries.

mod dispatcher;

pub use dispatcher::UpdateDispatcher;
