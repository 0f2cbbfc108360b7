//! HTTP helpers for provider calls: request execution, retry budgeting, and cache semantics.

pub mod client;
pub mod retry;
pub mod semantics;
