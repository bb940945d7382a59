use std::num::NonZeroUsize;

/// Length of the `.xid` file header holding the transaction counter
pub const XID_HEADER_LENGTH: u64 = 8;

/// Size of one transaction status record
pub const XID_RECORD_SIZE: u64 = 1;

/// Number of lock stripes guarding status record updates
pub const XID_RECORD_LOCK_STRIPES: usize = 16;

/// Suffix appended to the base path of a transaction log
pub const XID_FILE_SUFFIX: &str = ".xid";

/// Default cache bound (0 = unbounded)
pub const DEFAULT_MAX_RESOURCES: i64 = 0;

/// Runtime configuration for a resource cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheConfig {
    /// Upper bound on resident + loading entries, None when unbounded
    pub max_resources: Option<NonZeroUsize>,
}

impl CacheConfig {
    /// A cache with no upper bound.
    pub fn unbounded() -> Self {
        Self {
            max_resources: None,
        }
    }

    /// A cache holding at most `max` entries. A zero bound means unbounded.
    pub fn bounded(max: usize) -> Self {
        Self {
            max_resources: NonZeroUsize::new(max),
        }
    }

    /// Interprets a signed bound: anything <= 0 is unbounded.
    pub fn from_max_resources(max_resources: i64) -> Self {
        if max_resources <= 0 {
            Self::unbounded()
        } else {
            Self::bounded(usize::try_from(max_resources).unwrap_or(usize::MAX))
        }
    }
}
