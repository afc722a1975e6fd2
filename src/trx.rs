//! # Transactions
//!
//! Minimal transaction handles for DDL-driven bulk loads. A transaction
//! carries a monotonically increasing id (stamped into secondary-index leaf
//! pages) and a cooperative interruption flag the loader polls between leaf
//! pages.
//!
//! Ids come from a global atomic counter and are never reused; id 0 is
//! reserved for bootstrapped data.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub type TrxId = u64;

static NEXT_TRX_ID: AtomicU64 = AtomicU64::new(1);

/// A transaction handle. Cheap to share; interruption is signalled from any
/// thread and observed at the loader's cancellation points.
#[derive(Debug)]
pub struct Trx {
    id: TrxId,
    interrupted: AtomicBool,
}

impl Trx {
    pub fn begin() -> Arc<Trx> {
        Arc::new(Trx {
            id: NEXT_TRX_ID.fetch_add(1, Ordering::SeqCst),
            interrupted: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> TrxId {
        self.id
    }

    /// Requests cancellation. The loader notices at its next leaf-page
    /// boundary and unwinds with `BuildError::Interrupted`.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = Trx::begin();
        let b = Trx::begin();
        assert!(b.id() > a.id());
    }

    #[test]
    fn interruption_is_sticky() {
        let trx = Trx::begin();
        assert!(!trx.is_interrupted());
        trx.interrupt();
        assert!(trx.is_interrupted());
        assert!(trx.is_interrupted());
    }
}
