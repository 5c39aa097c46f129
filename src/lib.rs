//! A dynamic extension framework that turns an arbitrary static, immutable,
//! sorted, in-memory shard into a fully dynamic structure supporting
//! concurrent inserts, deletes and parameterised queries.
//!
//! Callers supply a record type ([`Record`]), a shard type built from an
//! unsorted record array ([`Shard`]), and a query type describing how to
//! preprocess, execute against one shard or buffer, and merge partial
//! results ([`Query`]). The crate furnishes the rest: a concurrent insert
//! buffer, a leveled/tiered log-structured layout of sealed shards, a
//! reconstruction engine preserving a bounded-tombstone invariant, epoch-based
//! reclamation so queries see a consistent snapshot while inserts and
//! reconstructions proceed in the background, and a job scheduler.
//!
//! Concrete shard/query implementations (B-tree, ISAM, range queries, kNN,
//! ...), durability, distribution and cross-shard secondary indexing are all
//! out of scope here; this crate is the core those are built on top of.

mod bloom;
pub mod buffer;
pub mod config;
mod debug;
pub mod epoch;
pub mod error;
pub mod extension;
mod future;
pub mod level;
mod merge;
pub mod query;
pub mod record;
pub mod scheduler;
pub mod shard;
pub mod structure;

pub use buffer::{Buffer, BufferView};
pub use config::{DeletePolicy, ExtensionOptions, LayoutPolicy, SchedulerKind};
pub use epoch::Epoch;
pub use error::{DynamicExtensionError, Result};
pub use extension::DynamicExtension;
pub use future::QueryFuture;
pub use level::InternalLevel;
pub use merge::{sorted_merge, Cursor, MergedRun};
pub use query::Query;
pub use record::{Record, Wrapped};
pub use shard::{Shard, SortedShard};
pub use structure::{ExtensionStructure, ReconstructionTask};
