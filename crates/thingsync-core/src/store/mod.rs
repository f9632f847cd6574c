// ── Reactive data store ──
//
// Concurrent device storage with push-based change notification.

mod catalog;
mod collection;

pub use catalog::Catalog;
