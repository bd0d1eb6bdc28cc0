use std::sync::atomic::{AtomicU8, Ordering};

const PENDING: u8 = 0;
const COMMITTED: u8 = 1;
const ABANDONED: u8 = 2;

/// Settles, exactly once, whether a running transfer may publish its result
/// or has been given up on by its caller.
///
/// The transfer calls [`commit`](Self::commit) right before making its result
/// visible (a rename, a remote `mv`). The caller calls
/// [`abandon`](Self::abandon) when its deadline passes. Whichever comes first
/// wins; the loser sees `false`.
#[derive(Debug, Default)]
pub struct CommitGate(AtomicU8);

impl CommitGate {
    pub fn commit(&self) -> bool {
        self.settle(COMMITTED)
    }

    pub fn abandon(&self) -> bool {
        self.settle(ABANDONED)
    }

    pub fn is_abandoned(&self) -> bool {
        self.0.load(Ordering::SeqCst) == ABANDONED
    }

    fn settle(&self, to: u8) -> bool {
        self.0
            .compare_exchange(PENDING, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
