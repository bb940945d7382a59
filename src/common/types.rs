use std::fmt;

/// Transaction identifier - a 64-bit id handed out by the transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Xid(pub u64);

impl Xid {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true for the super transaction (xid 0).
    pub fn is_super(&self) -> bool {
        *self == SUPER_XID
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid({})", self.0)
    }
}

/// The synthetic "no transaction" id. Always committed, never written to disk.
pub const SUPER_XID: Xid = Xid(0);

/// Key under which a resource is cached
pub type ResourceKey = u64;

/// Persisted state of a transaction, stored as one byte per xid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TxnStatus {
    Active = 0,
    Committed = 1,
    Aborted = 2,
}

impl TxnStatus {
    /// Decodes a status byte. Returns None for bytes outside the known set.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TxnStatus::Active),
            1 => Some(TxnStatus::Committed),
            2 => Some(TxnStatus::Aborted),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Committed and Aborted are final; nothing moves a transaction out of them.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TxnStatus::Active)
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnStatus::Active => "active",
            TxnStatus::Committed => "committed",
            TxnStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
