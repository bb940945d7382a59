//! Integration tests for the transaction log

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::sync::Arc;
use std::thread;

use borealis::common::{XID_HEADER_LENGTH, XID_RECORD_SIZE};
use borealis::transaction::{xid_file_path, TransactionLog};
use borealis::{FatalError, TxnLogError, TxnStatus, Xid, SUPER_XID};
use rand::Rng;
use tempfile::TempDir;

fn base_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("test_tm")
}

#[test]
fn test_transaction_log_create_file() {
    let dir = TempDir::new().unwrap();
    let log = TransactionLog::create(base_path(&dir)).unwrap();

    let path = xid_file_path(base_path(&dir));
    assert_eq!(log.path(), path.as_path());
    assert_eq!(fs::metadata(&path).unwrap().len(), XID_HEADER_LENGTH);
}

#[test]
fn test_transaction_log_create_resets_existing() {
    let dir = TempDir::new().unwrap();
    {
        let log = TransactionLog::create(base_path(&dir)).unwrap();
        let xid = log.begin().unwrap();
        log.commit(xid).unwrap();
        log.close().unwrap();
    }

    let log = TransactionLog::create(base_path(&dir)).unwrap();
    assert_eq!(log.last_xid(), SUPER_XID);
    assert_eq!(fs::metadata(log.path()).unwrap().len(), XID_HEADER_LENGTH);
    assert!(matches!(
        log.status(Xid::new(1)),
        Err(TxnLogError::UnknownTransaction(_))
    ));
    log.close().unwrap();

    // The reset log validates on reopen and allocates from 1 again
    let log = TransactionLog::open(base_path(&dir)).unwrap();
    assert_eq!(log.begin().unwrap(), Xid::new(1));
}

#[test]
fn test_transaction_log_open_missing() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        TransactionLog::open(base_path(&dir)),
        Err(FatalError::Io { .. })
    ));
}

#[test]
fn test_transaction_log_begin_is_monotonic() {
    let dir = TempDir::new().unwrap();
    let log = TransactionLog::create(base_path(&dir)).unwrap();

    for expected in 1..=20 {
        let xid = log.begin().unwrap();
        assert_eq!(xid, Xid::new(expected));
        assert!(log.is_active(xid).unwrap());
    }
    assert_eq!(log.last_xid(), Xid::new(20));
    assert_eq!(
        fs::metadata(log.path()).unwrap().len(),
        XID_HEADER_LENGTH + 20 * XID_RECORD_SIZE
    );
}

#[test]
fn test_transaction_log_commit_abort() {
    let dir = TempDir::new().unwrap();
    let log = TransactionLog::create(base_path(&dir)).unwrap();

    let committed = log.begin().unwrap();
    let aborted = log.begin().unwrap();
    let running = log.begin().unwrap();

    log.commit(committed).unwrap();
    log.abort(aborted).unwrap();

    assert!(!log.is_active(committed).unwrap());
    assert!(log.is_committed(committed).unwrap());
    assert!(!log.is_active(aborted).unwrap());
    assert!(log.is_aborted(aborted).unwrap());
    assert!(log.is_active(running).unwrap());
    assert_eq!(log.status(running).unwrap(), TxnStatus::Active);
}

#[test]
fn test_transaction_log_super_transaction() {
    let dir = TempDir::new().unwrap();
    let log = TransactionLog::create(base_path(&dir)).unwrap();

    assert!(log.is_committed(SUPER_XID).unwrap());
    assert!(!log.is_active(SUPER_XID).unwrap());
    assert!(!log.is_aborted(SUPER_XID).unwrap());
    assert!(matches!(
        log.abort(SUPER_XID),
        Err(TxnLogError::SuperTransaction)
    ));
}

#[test]
fn test_transaction_log_durability_round_trip() {
    let dir = TempDir::new().unwrap();

    let xid = {
        let log = TransactionLog::create(base_path(&dir)).unwrap();
        let xid = log.begin().unwrap();
        assert_eq!(xid, Xid::new(1));
        log.commit(xid).unwrap();
        log.close().unwrap();
        xid
    };

    let log = TransactionLog::open(base_path(&dir)).unwrap();
    assert!(log.is_committed(xid).unwrap());
    assert_eq!(log.last_xid(), xid);

    // Allocation resumes after the persisted counter
    assert_eq!(log.begin().unwrap(), Xid::new(2));
}

#[test]
fn test_transaction_log_counter_beyond_one_byte() {
    let dir = TempDir::new().unwrap();

    {
        let log = TransactionLog::create(base_path(&dir)).unwrap();
        for _ in 0..300 {
            let xid = log.begin().unwrap();
            if xid.as_u64() % 2 == 0 {
                log.commit(xid).unwrap();
            } else {
                log.abort(xid).unwrap();
            }
        }
        log.close().unwrap();
    }

    let log = TransactionLog::open(base_path(&dir)).unwrap();
    assert_eq!(log.last_xid(), Xid::new(300));
    assert!(log.is_committed(Xid::new(256)).unwrap());
    assert!(log.is_aborted(Xid::new(299)).unwrap());
    assert_eq!(log.begin().unwrap(), Xid::new(301));
}

#[test]
fn test_transaction_log_reads_low_byte_counter_files() {
    let dir = TempDir::new().unwrap();

    // Counter stored in the first header byte only, three records
    let mut bytes = vec![3u8, 0, 0, 0, 0, 0, 0, 0];
    bytes.extend_from_slice(&[1, 2, 0]);
    fs::write(xid_file_path(base_path(&dir)), &bytes).unwrap();

    let log = TransactionLog::open(base_path(&dir)).unwrap();
    assert_eq!(log.last_xid(), Xid::new(3));
    assert!(log.is_committed(Xid::new(1)).unwrap());
    assert!(log.is_aborted(Xid::new(2)).unwrap());
    assert!(log.is_active(Xid::new(3)).unwrap());
}

#[test]
fn test_transaction_log_detects_truncation() {
    let dir = TempDir::new().unwrap();
    {
        let log = TransactionLog::create(base_path(&dir)).unwrap();
        log.begin().unwrap();
        log.begin().unwrap();
        log.close().unwrap();
    }

    let path = xid_file_path(base_path(&dir));
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(XID_HEADER_LENGTH + 1).unwrap();
    drop(file);

    match TransactionLog::open(base_path(&dir)) {
        Err(FatalError::Corruption {
            expected, actual, ..
        }) => {
            assert_eq!(expected, XID_HEADER_LENGTH + 2);
            assert_eq!(actual, XID_HEADER_LENGTH + 1);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("truncated log opened"),
    }
}

#[test]
fn test_transaction_log_detects_extension() {
    let dir = TempDir::new().unwrap();
    {
        let log = TransactionLog::create(base_path(&dir)).unwrap();
        log.begin().unwrap();
        log.close().unwrap();
    }

    let path = xid_file_path(base_path(&dir));
    let mut bytes = fs::read(&path).unwrap();
    bytes.push(0);
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        TransactionLog::open(base_path(&dir)),
        Err(FatalError::Corruption { .. })
    ));
}

#[test]
fn test_transaction_log_concurrent_begin() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let dir = TempDir::new().unwrap();
    let log = Arc::new(TransactionLog::create(base_path(&dir)).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| log.begin().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for xid in handle.join().unwrap() {
            assert!(seen.insert(xid.as_u64()));
        }
    }

    let total = (THREADS * PER_THREAD) as u64;
    assert_eq!(seen, (1..=total).collect::<HashSet<_>>());
    assert_eq!(log.last_xid(), Xid::new(total));
}

#[test]
fn test_transaction_log_concurrent_finish() {
    const TXNS: u64 = 64;

    let dir = TempDir::new().unwrap();
    let log = Arc::new(TransactionLog::create(base_path(&dir)).unwrap());
    let xids: Vec<_> = (0..TXNS).map(|_| log.begin().unwrap()).collect();

    let mut rng = rand::thread_rng();
    let plan: Vec<(Xid, bool)> = xids.iter().map(|&x| (x, rng.gen_bool(0.5))).collect();

    let handles: Vec<_> = plan
        .chunks(8)
        .map(|chunk| {
            let log = Arc::clone(&log);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for (xid, commit) in chunk {
                    if commit {
                        log.commit(xid).unwrap();
                    } else {
                        log.abort(xid).unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for (xid, commit) in plan {
        assert_eq!(log.is_committed(xid).unwrap(), commit);
        assert_eq!(log.is_aborted(xid).unwrap(), !commit);
        assert!(!log.is_active(xid).unwrap());
    }
}

#[test]
fn test_transaction_log_racing_commit_and_abort() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(TransactionLog::create(base_path(&dir)).unwrap());
    let xid = log.begin().unwrap();

    let committer = {
        let log = Arc::clone(&log);
        thread::spawn(move || log.commit(xid))
    };
    let aborter = {
        let log = Arc::clone(&log);
        thread::spawn(move || log.abort(xid))
    };

    let commit_result = committer.join().unwrap();
    let abort_result = aborter.join().unwrap();

    // Exactly one side wins and the loser sees the winner's status
    assert_ne!(commit_result.is_ok(), abort_result.is_ok());
    let final_status = log.status(xid).unwrap();
    if commit_result.is_ok() {
        assert_eq!(final_status, TxnStatus::Committed);
        assert!(matches!(
            abort_result,
            Err(TxnLogError::AlreadyTerminal {
                status: TxnStatus::Committed,
                ..
            })
        ));
    } else {
        assert_eq!(final_status, TxnStatus::Aborted);
    }
}
