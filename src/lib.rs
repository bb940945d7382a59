//! Borealis - building blocks for a disk-oriented database kernel
//!
//! This crate provides two independent components meant to be composed by
//! higher layers such as a page cache or a recovery manager.
//!
//! # Architecture
//!
//! - **Cache** (`cache`): Bounded, reference-counted resource cache
//!   - `ResourceCache`: Keyed cache that loads on a miss and releases at zero references
//!   - `ResourceLoader`: Collaborator supplying `load` and `release`
//!   - `ResourceGuard`: RAII handle that releases its reference when dropped
//!
//! - **Transaction** (`transaction`): Durable transaction status log
//!   - `TransactionLog`: Fixed-record `.xid` file with a persisted xid counter
//!
//! - **Common** (`common`): Shared types, constants and error types
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use borealis::cache::{ResourceCache, ResourceLoader};
//! use borealis::transaction::TransactionLog;
//!
//! struct Blocks;
//!
//! impl ResourceLoader for Blocks {
//!     type Resource = Vec<u8>;
//!     type Error = std::io::Error;
//!
//!     fn load(&self, key: u64) -> Result<Vec<u8>, std::io::Error> {
//!         Ok(vec![key as u8; 16])
//!     }
//!
//!     fn release(&self, _key: u64, _resource: Arc<Vec<u8>>) {}
//! }
//!
//! // A cache holding at most 64 blocks
//! let cache = ResourceCache::new(64, Blocks);
//! let block = cache.get(7).unwrap();
//! assert_eq!(block[0], 7);
//! cache.release(7);
//!
//! // Transaction statuses live in "data/db.xid"
//! let log = TransactionLog::create("data/db").unwrap();
//! let xid = log.begin().unwrap();
//! log.commit(xid).unwrap();
//! log.close().unwrap();
//! ```

pub mod cache;
pub mod common;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use common::{CacheError, FatalError, TxnLogError, TxnResult, TxnStatus, Xid, SUPER_XID};
