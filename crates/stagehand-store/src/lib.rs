//! Hierarchical key/value property store.
//!
//! Keys are dotted strings (`release.tag`), values are typed [`Value`]s.
//! Three structural variants compose the store used by the engine:
//! - [`MemoryKv`]: the leaf store holding flat dotted keys;
//! - [`LayeredKv`]: an ordered stack of stores where the last layer wins;
//! - [`TrackedKv`]: an overlay recording every write so it can be drained as a delta.

mod error;
pub use error::StoreError;

mod value;
pub use value::{Value, format_duration, parse_duration};

mod kv;
pub use kv::{Delta, Kv, KvExt};

mod memory;
pub use memory::MemoryKv;

mod layer;
pub use layer::LayeredKv;

mod changes;
pub use changes::TrackedKv;

mod sub;
pub use sub::SubKv;
