//! Per-entity version chains driven by a single per-pass watermark.
//!
//! Both resolvers read the watermark captured before the pass started and
//! consult the store through the caller's [`StoreBatch`](crate::store::StoreBatch),
//! so lookups observe writes made earlier in the same line.

pub mod page;
pub mod redirect;

pub use page::{PageResolution, resolve_page};
pub use redirect::resolve_redirect;
