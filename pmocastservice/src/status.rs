//! Atomic lifecycle register.
//!
//! The service's mode lives in a single register with five resting values
//! and one transient "locked" value that brackets side-effecting
//! transitions. Every operation here is a single compare-and-swap: a
//! concurrent transition attempt fails cleanly instead of blocking, and no
//! lock is ever held by the register itself across I/O.
//!
//! The register packs two cells into one atomic word: the CAS cell (which
//! may transiently hold the sentinel) and the last resting value. Queries
//! read the resting cell, so an external observer sees the pre- or
//! post-transition value, never the sentinel — even while a transition
//! brackets a network call.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

use crate::errors::CastError;

/// Transient sentinel held while a transition's side effects run. Internal
/// only: never a [`CastStatus`] variant, never observable from
/// [`StatusRegister::status`].
const LOCKED: i32 = -1;

/// Resting values of the service lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CastStatus {
    Uninitialized = 0,
    Ready = 1,
    DeviceSelected = 2,
    CastingFile = 3,
    CastingScreen = 4,
}

impl CastStatus {
    fn from_raw(raw: i32) -> CastStatus {
        match raw {
            0 => CastStatus::Uninitialized,
            1 => CastStatus::Ready,
            2 => CastStatus::DeviceSelected,
            3 => CastStatus::CastingFile,
            4 => CastStatus::CastingScreen,
            // Only resting values are ever stored in the observable cell
            _ => unreachable!("invalid resting status value {raw}"),
        }
    }

    pub fn is_casting(&self) -> bool {
        matches!(self, CastStatus::CastingFile | CastStatus::CastingScreen)
    }
}

fn pack(state: i32, resting: i32) -> u64 {
    (u64::from(state as u32) << 32) | u64::from(resting as u32)
}

fn unpack(word: u64) -> (i32, i32) {
    ((word >> 32) as u32 as i32, word as u32 as i32)
}

pub struct StatusRegister {
    // High 32 bits: CAS cell (resting value or LOCKED).
    // Low 32 bits: last resting value, what queries see.
    // Invariant: both halves are equal whenever the register is at rest.
    word: AtomicU64,
}

impl StatusRegister {
    pub fn new() -> Self {
        let initial = CastStatus::Uninitialized as i32;
        Self {
            word: AtomicU64::new(pack(initial, initial)),
        }
    }

    /// Last resting value; never the locked sentinel.
    pub fn status(&self) -> CastStatus {
        let (_, resting) = unpack(self.word.load(Ordering::Acquire));
        CastStatus::from_raw(resting)
    }

    /// Begins a transition: swaps the register from `expected` to the
    /// locked sentinel. Fails with no side effect if the current value is
    /// not `expected`.
    pub fn try_lock(&self, expected: CastStatus) -> Result<(), CastError> {
        let expected_raw = expected as i32;
        self.word
            .compare_exchange(
                pack(expected_raw, expected_raw),
                pack(LOCKED, expected_raw),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| CastError::StateConflict(self.status()))
    }

    /// Attempts [`try_lock`](Self::try_lock) over an ordered list of
    /// candidates, returning the first that succeeds.
    pub fn try_lock_any(&self, candidates: &[CastStatus]) -> Result<CastStatus, CastError> {
        for &candidate in candidates {
            if self.try_lock(candidate).is_ok() {
                return Ok(candidate);
            }
        }
        Err(CastError::StateConflict(self.status()))
    }

    /// Ends a transition: swaps the register from the locked sentinel to
    /// `new`, committing the transition or rolling back to the
    /// pre-transition value.
    ///
    /// Only the holder of the corresponding [`try_lock`](Self::try_lock)
    /// may call this.
    pub fn unlock(&self, new: CastStatus) {
        let new_raw = new as i32;
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let (state, _) = unpack(current);
            if state != LOCKED {
                error!("unlock called without a held transition (state {state})");
                return;
            }
            match self.word.compare_exchange(
                current,
                pack(new_raw, new_raw),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Direct transition without the locked bracket, for moves that guard
    /// no multi-step side effect (cancellation, or an externally triggered
    /// completion such as the capture process exiting on its own).
    pub fn assign(&self, current: CastStatus, new: CastStatus) -> Result<(), CastError> {
        let current_raw = current as i32;
        let new_raw = new as i32;
        self.word
            .compare_exchange(
                pack(current_raw, current_raw),
                pack(new_raw, new_raw),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| CastError::StateConflict(self.status()))
    }
}

impl Default for StatusRegister {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn lock_commit_and_rollback() {
        let register = StatusRegister::new();
        assert_eq!(register.status(), CastStatus::Uninitialized);

        register.try_lock(CastStatus::Uninitialized).unwrap();
        // A query during the transition sees the pre-transition value
        assert_eq!(register.status(), CastStatus::Uninitialized);
        register.unlock(CastStatus::Ready);
        assert_eq!(register.status(), CastStatus::Ready);

        // Rollback path
        register.try_lock(CastStatus::Ready).unwrap();
        register.unlock(CastStatus::Ready);
        assert_eq!(register.status(), CastStatus::Ready);
    }

    #[test]
    fn locked_register_rejects_other_transitions() {
        let register = StatusRegister::new();
        register.try_lock(CastStatus::Uninitialized).unwrap();

        assert!(register.try_lock(CastStatus::Uninitialized).is_err());
        assert!(register.try_lock(CastStatus::Ready).is_err());
        assert!(
            register
                .assign(CastStatus::Uninitialized, CastStatus::Ready)
                .is_err()
        );

        register.unlock(CastStatus::Ready);
    }

    #[test]
    fn try_lock_any_returns_the_matched_state() {
        let register = StatusRegister::new();
        register.try_lock(CastStatus::Uninitialized).unwrap();
        register.unlock(CastStatus::DeviceSelected);

        let matched = register
            .try_lock_any(&[CastStatus::Ready, CastStatus::DeviceSelected])
            .unwrap();
        assert_eq!(matched, CastStatus::DeviceSelected);
        register.unlock(matched);
    }

    #[test]
    fn assign_moves_between_resting_values() {
        let register = StatusRegister::new();
        register
            .assign(CastStatus::Uninitialized, CastStatus::Ready)
            .unwrap();
        assert_eq!(register.status(), CastStatus::Ready);
        assert!(
            register
                .assign(CastStatus::CastingFile, CastStatus::DeviceSelected)
                .is_err()
        );
    }

    #[test]
    fn contended_lock_admits_exactly_one_winner() {
        let register = Arc::new(StatusRegister::new());
        register
            .assign(CastStatus::Uninitialized, CastStatus::Ready)
            .unwrap();

        let winners = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let register = register.clone();
            let winners = winners.clone();
            handles.push(thread::spawn(move || {
                if register.try_lock(CastStatus::Ready).is_ok() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
                // Every observer sees a resting value throughout
                let status = register.status();
                assert!(matches!(
                    status,
                    CastStatus::Ready | CastStatus::DeviceSelected
                ));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        register.unlock(CastStatus::DeviceSelected);
        assert_eq!(register.status(), CastStatus::DeviceSelected);
    }
}
