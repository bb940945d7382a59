use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::common::{
    FatalError, TxnLogError, TxnResult, TxnStatus, Xid, XID_FILE_SUFFIX, XID_HEADER_LENGTH,
    XID_RECORD_LOCK_STRIPES, XID_RECORD_SIZE,
};

/// Returns the path of the xid file for a base path (`<base>.xid`).
pub fn xid_file_path<P: AsRef<Path>>(base: P) -> PathBuf {
    let mut path = base.as_ref().as_os_str().to_os_string();
    path.push(XID_FILE_SUFFIX);
    PathBuf::from(path)
}

/// Byte offset of the status record for `xid`.
///
/// The super transaction has no record, so `SUPER_XID` yields None, as does
/// an xid whose offset does not fit in a u64.
pub fn xid_position(xid: Xid) -> Option<u64> {
    xid.as_u64()
        .checked_sub(1)
        .and_then(|index| index.checked_mul(XID_RECORD_SIZE))
        .and_then(|offset| offset.checked_add(XID_HEADER_LENGTH))
}

/// File length implied by a counter value. None if it does not fit in a u64.
fn expected_file_len(counter: u64) -> Option<u64> {
    counter
        .checked_mul(XID_RECORD_SIZE)
        .and_then(|records| records.checked_add(XID_HEADER_LENGTH))
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut total = 0_usize;
    while total < buf.len() {
        let n = file.seek_read(&mut buf[total..], offset + total as u64)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"));
        }
        total += n;
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut total = 0_usize;
    while total < buf.len() {
        let n = file.seek_write(&buf[total..], offset + total as u64)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "seek_write returned 0"));
        }
        total += n;
    }
    Ok(())
}

/// TransactionLog records the status of every transaction in a `.xid` file.
///
/// The file starts with an 8-byte little-endian counter holding the highest
/// xid handed out so far, followed by one status byte per xid starting at 1.
/// Records are contiguous, so the file length always equals
/// `header + counter * record_size`; `open` refuses files where it does not.
///
/// Every write is synced before the call returns. `begin` syncs the new
/// status record before it syncs the counter, so after a crash the counter
/// never names an xid whose record is missing.
///
/// All file access is positional. `begin` is serialized by the counter lock;
/// `commit` and `abort` only lock the stripe owning their record, and status
/// queries take no lock at all.
///
/// Any I/O failure or corrupted record is reported as a [`FatalError`] and
/// poisons the log: calls that acquire their lock afterwards fail with
/// [`FatalError::Poisoned`] without touching the file.
pub struct TransactionLog {
    /// The xid file
    file: File,
    /// Path to the xid file
    path: PathBuf,
    /// Highest xid whose record and counter are durable
    xid_counter: AtomicU64,
    /// Serializes xid allocation in `begin`
    counter_lock: Mutex<()>,
    /// Serializes check-then-write on records sharing a stripe
    record_locks: Vec<Mutex<()>>,
    /// Set once a fatal error has been observed
    poisoned: AtomicBool,
}

impl TransactionLog {
    /// Creates a fresh, empty log at `<base>.xid`.
    /// An existing file at that path is truncated.
    pub fn create<P: AsRef<Path>>(base: P) -> Result<Self, FatalError> {
        let path = xid_file_path(base);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(FatalError::io("create xid file"))?;

        let mut header = BytesMut::with_capacity(XID_HEADER_LENGTH as usize);
        header.put_u64_le(0);
        write_all_at(&file, &header, 0).map_err(FatalError::io("write xid header"))?;
        file.sync_all()
            .map_err(FatalError::io("sync xid header"))?;

        debug!(path = %path.display(), "created transaction log");
        Ok(Self::from_parts(file, path, 0))
    }

    /// Opens an existing log at `<base>.xid` and validates its length
    /// against the stored counter.
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self, FatalError> {
        let path = xid_file_path(base);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(FatalError::io("open xid file"))?;

        let file_len = file
            .metadata()
            .map_err(FatalError::io("stat xid file"))?
            .len();
        if file_len < XID_HEADER_LENGTH {
            error!(path = %path.display(), file_len, "xid file header truncated");
            return Err(FatalError::HeaderTruncated {
                path,
                actual: file_len,
            });
        }

        let mut header = [0u8; XID_HEADER_LENGTH as usize];
        read_exact_at(&file, &mut header, 0).map_err(FatalError::io("read xid header"))?;
        let counter = (&header[..]).get_u64_le();

        if expected_file_len(counter) != Some(file_len) {
            error!(path = %path.display(), counter, file_len, "xid file length mismatch");
            return Err(FatalError::Corruption {
                path,
                expected: expected_file_len(counter).unwrap_or(u64::MAX),
                actual: file_len,
            });
        }

        debug!(path = %path.display(), counter, "opened transaction log");
        Ok(Self::from_parts(file, path, counter))
    }

    fn from_parts(file: File, path: PathBuf, counter: u64) -> Self {
        Self {
            file,
            path,
            xid_counter: AtomicU64::new(counter),
            counter_lock: Mutex::new(()),
            record_locks: (0..XID_RECORD_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Starts a new transaction and returns its xid.
    pub fn begin(&self) -> TxnResult<Xid> {
        let _alloc = self.counter_lock.lock();
        self.ensure_healthy()?;

        let xid = Xid::new(self.xid_counter.load(Ordering::Acquire) + 1);
        let offset = xid_position(xid).ok_or(TxnLogError::UnknownTransaction(xid))?;

        self.check(self.write_status(offset, TxnStatus::Active))?;
        self.check(self.write_counter(xid.as_u64()))?;

        self.xid_counter.store(xid.as_u64(), Ordering::Release);
        debug!(xid = xid.as_u64(), "transaction started");
        Ok(xid)
    }

    /// Marks an active transaction as committed.
    pub fn commit(&self, xid: Xid) -> TxnResult<()> {
        self.finish(xid, TxnStatus::Committed)
    }

    /// Marks an active transaction as aborted.
    pub fn abort(&self, xid: Xid) -> TxnResult<()> {
        self.finish(xid, TxnStatus::Aborted)
    }

    /// Returns the recorded status of `xid`. The super transaction is
    /// always committed and never reads the file.
    pub fn status(&self, xid: Xid) -> TxnResult<TxnStatus> {
        if xid.is_super() {
            return Ok(TxnStatus::Committed);
        }

        self.ensure_healthy()?;
        let offset = self.allocated_position(xid)?;
        let status = self.check(self.read_status(xid, offset))?;

        // A status read racing a fatal failure is not trusted either
        self.ensure_healthy()?;
        Ok(status)
    }

    pub fn is_active(&self, xid: Xid) -> TxnResult<bool> {
        Ok(self.status(xid)? == TxnStatus::Active)
    }

    pub fn is_committed(&self, xid: Xid) -> TxnResult<bool> {
        Ok(self.status(xid)? == TxnStatus::Committed)
    }

    pub fn is_aborted(&self, xid: Xid) -> TxnResult<bool> {
        Ok(self.status(xid)? == TxnStatus::Aborted)
    }

    /// Returns the highest xid handed out so far (SUPER_XID if none).
    pub fn last_xid(&self) -> Xid {
        Xid::new(self.xid_counter.load(Ordering::Acquire))
    }

    /// Returns the path to the xid file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once a fatal error has been observed.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Flushes the file and releases it.
    pub fn close(self) -> Result<(), FatalError> {
        self.ensure_healthy()?;
        self.file
            .sync_all()
            .map_err(FatalError::io("sync xid file"))?;
        debug!(path = %self.path.display(), "closed transaction log");
        Ok(())
    }

    fn finish(&self, xid: Xid, status: TxnStatus) -> TxnResult<()> {
        if xid.is_super() {
            return Err(TxnLogError::SuperTransaction);
        }

        let offset = self.allocated_position(xid)?;
        let _record = self.record_lock(xid);
        self.ensure_healthy()?;

        let current = self.check(self.read_status(xid, offset))?;
        if current.is_terminal() {
            warn!(xid = xid.as_u64(), %current, requested = %status, "transaction already finished");
            return Err(TxnLogError::AlreadyTerminal {
                xid,
                status: current,
            });
        }

        self.check(self.write_status(offset, status))?;
        debug!(xid = xid.as_u64(), %status, "transaction finished");
        Ok(())
    }

    fn record_lock(&self, xid: Xid) -> MutexGuard<'_, ()> {
        let stripe = (xid.as_u64() % self.record_locks.len() as u64) as usize;
        self.record_locks[stripe].lock()
    }

    fn ensure_healthy(&self) -> Result<(), FatalError> {
        if self.is_poisoned() {
            return Err(FatalError::Poisoned);
        }
        Ok(())
    }

    /// Returns the record offset of an xid that `begin` has handed out.
    fn allocated_position(&self, xid: Xid) -> TxnResult<u64> {
        if xid.as_u64() > self.xid_counter.load(Ordering::Acquire) {
            return Err(TxnLogError::UnknownTransaction(xid));
        }
        xid_position(xid).ok_or(TxnLogError::UnknownTransaction(xid))
    }

    /// Poisons the log if `result` carries a fatal error.
    fn check<T>(&self, result: Result<T, FatalError>) -> Result<T, FatalError> {
        if let Err(err) = &result {
            error!(path = %self.path.display(), %err, "transaction log poisoned");
            self.poisoned.store(true, Ordering::Release);
        }
        result
    }

    fn write_status(&self, offset: u64, status: TxnStatus) -> Result<(), FatalError> {
        write_all_at(&self.file, &[status.as_byte()], offset)
            .map_err(FatalError::io("write status record"))?;
        self.file
            .sync_all()
            .map_err(FatalError::io("sync status record"))
    }

    fn read_status(&self, xid: Xid, offset: u64) -> Result<TxnStatus, FatalError> {
        let mut buf = [0u8; XID_RECORD_SIZE as usize];
        read_exact_at(&self.file, &mut buf, offset)
            .map_err(FatalError::io("read status record"))?;
        TxnStatus::from_byte(buf[0]).ok_or(FatalError::InvalidStatus { xid, byte: buf[0] })
    }

    fn write_counter(&self, counter: u64) -> Result<(), FatalError> {
        let mut header = BytesMut::with_capacity(XID_HEADER_LENGTH as usize);
        header.put_u64_le(counter);

        write_all_at(&self.file, &header, 0).map_err(FatalError::io("write xid header"))?;
        self.file
            .sync_all()
            .map_err(FatalError::io("sync xid header"))
    }
}

impl Drop for TransactionLog {
    fn drop(&mut self) {
        // Ensure all data is flushed to disk
        let _ = self.file.sync_all();
    }
}
