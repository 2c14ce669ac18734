//! Transaction Parameter Buffer (TPB) encoding.

use bitflags::bitflags;

use crate::dpb::ParameterBuffer;

/// TPB version tag.
pub const VERSION3: u8 = 3;

/// TPB item tags (`isc_tpb_*`).
pub mod tags {
    /// Table-level consistency (serializable).
    pub const CONSISTENCY: u8 = 1;
    /// Snapshot isolation.
    pub const CONCURRENCY: u8 = 2;
    /// Shared table reservation.
    pub const SHARED: u8 = 3;
    /// Protected table reservation.
    pub const PROTECTED: u8 = 4;
    /// Exclusive table reservation.
    pub const EXCLUSIVE: u8 = 5;
    /// Wait on lock conflicts.
    pub const WAIT: u8 = 6;
    /// Fail immediately on lock conflicts.
    pub const NOWAIT: u8 = 7;
    /// Read-only transaction.
    pub const READ: u8 = 8;
    /// Read-write transaction.
    pub const WRITE: u8 = 9;
    /// Reserve a table for reading.
    pub const LOCK_READ: u8 = 10;
    /// Reserve a table for writing.
    pub const LOCK_WRITE: u8 = 11;
    /// Read committed isolation.
    pub const READ_COMMITTED: u8 = 15;
    /// Commit automatically after each statement.
    pub const AUTOCOMMIT: u8 = 16;
    /// Read the latest committed record version.
    pub const REC_VERSION: u8 = 17;
    /// Wait for uncommitted record versions.
    pub const NO_REC_VERSION: u8 = 18;
    /// Restart requests on conflicts.
    pub const RESTART_REQUESTS: u8 = 19;
    /// Skip the undo log.
    pub const NO_AUTO_UNDO: u8 = 20;
    /// Lock wait timeout in seconds.
    pub const LOCK_TIMEOUT: u8 = 21;
}

bitflags! {
    /// Transaction behaviour flags, one per bare TPB item.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransactionFlags: u32 {
        /// `isc_tpb_consistency`.
        const CONSISTENCY = 1 << 0;
        /// `isc_tpb_concurrency`.
        const CONCURRENCY = 1 << 1;
        /// `isc_tpb_shared`.
        const SHARED = 1 << 2;
        /// `isc_tpb_protected`.
        const PROTECTED = 1 << 3;
        /// `isc_tpb_exclusive`.
        const EXCLUSIVE = 1 << 4;
        /// `isc_tpb_wait`.
        const WAIT = 1 << 5;
        /// `isc_tpb_nowait`.
        const NO_WAIT = 1 << 6;
        /// `isc_tpb_read`.
        const READ = 1 << 7;
        /// `isc_tpb_write`.
        const WRITE = 1 << 8;
        /// `isc_tpb_lock_read`.
        const LOCK_READ = 1 << 9;
        /// `isc_tpb_lock_write`.
        const LOCK_WRITE = 1 << 10;
        /// `isc_tpb_read_committed`.
        const READ_COMMITTED = 1 << 11;
        /// `isc_tpb_autocommit`.
        const AUTOCOMMIT = 1 << 12;
        /// `isc_tpb_rec_version`.
        const REC_VERSION = 1 << 13;
        /// `isc_tpb_no_rec_version`.
        const NO_REC_VERSION = 1 << 14;
        /// `isc_tpb_restart_requests`.
        const RESTART_REQUESTS = 1 << 15;
        /// `isc_tpb_no_auto_undo`.
        const NO_AUTO_UNDO = 1 << 16;
    }
}

const FLAG_TAGS: [(TransactionFlags, u8); 17] = [
    (TransactionFlags::CONSISTENCY, tags::CONSISTENCY),
    (TransactionFlags::CONCURRENCY, tags::CONCURRENCY),
    (TransactionFlags::SHARED, tags::SHARED),
    (TransactionFlags::PROTECTED, tags::PROTECTED),
    (TransactionFlags::EXCLUSIVE, tags::EXCLUSIVE),
    (TransactionFlags::WAIT, tags::WAIT),
    (TransactionFlags::NO_WAIT, tags::NOWAIT),
    (TransactionFlags::READ, tags::READ),
    (TransactionFlags::WRITE, tags::WRITE),
    (TransactionFlags::LOCK_READ, tags::LOCK_READ),
    (TransactionFlags::LOCK_WRITE, tags::LOCK_WRITE),
    (TransactionFlags::READ_COMMITTED, tags::READ_COMMITTED),
    (TransactionFlags::AUTOCOMMIT, tags::AUTOCOMMIT),
    (TransactionFlags::REC_VERSION, tags::REC_VERSION),
    (TransactionFlags::NO_REC_VERSION, tags::NO_REC_VERSION),
    (TransactionFlags::RESTART_REQUESTS, tags::RESTART_REQUESTS),
    (TransactionFlags::NO_AUTO_UNDO, tags::NO_AUTO_UNDO),
];

/// Build a TPB from flags and an optional lock timeout.
///
/// Items are emitted in tag order regardless of how the flags were combined.
#[must_use]
pub fn build(flags: TransactionFlags, lock_timeout: Option<i32>) -> ParameterBuffer {
    let mut tpb = ParameterBuffer::with_version(VERSION3);
    for (flag, tag) in FLAG_TAGS {
        if flags.contains(flag) {
            tpb.append_flag(tag);
        }
    }
    if let Some(seconds) = lock_timeout {
        tpb.append_int(tags::LOCK_TIMEOUT, seconds);
    }
    tpb
}
