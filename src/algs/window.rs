//! One-sided memory windows.
//!
//! A window is a block of `u64` words that remote participants may write into
//! with [`OneSided::put`]. Exposure is collective: every participant exposes
//! its windows in the same order, so the `n`-th window of each member shares
//! one [`WindowId`] and a writer addresses a target by `(id, rank, offset)`.
//!
//! [`ExposedWindow`] scopes a window to one exchange call: it is exposed on
//! construction and retracted when the guard is consumed or dropped, on every
//! exit path.

use crate::algs::communicator::TransportError;

/// Identity of one collective window exposure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

/// One-sided write capability of a participant.
pub trait OneSided: Send + Sync {
    /// Expose `words` as this participant's next window.
    fn expose(&self, words: Vec<u64>) -> Result<WindowId, TransportError>;
    /// Write `words` into `target`'s window starting at word `offset`.
    fn put(
        &self,
        window: WindowId,
        target: usize,
        offset: usize,
        words: &[u64],
    ) -> Result<(), TransportError>;
    /// Copy of this participant's own window.
    fn read(&self, window: WindowId) -> Result<Vec<u64>, TransportError>;
    /// Withdraw this participant's window and hand its memory back.
    fn retract(&self, window: WindowId) -> Result<Vec<u64>, TransportError>;
}

/// Scoped exposure of one window.
pub struct ExposedWindow<'a> {
    rma: &'a dyn OneSided,
    id: WindowId,
    live: bool,
}

impl<'a> ExposedWindow<'a> {
    pub fn expose(rma: &'a dyn OneSided, words: Vec<u64>) -> Result<Self, TransportError> {
        let id = rma.expose(words)?;
        log::trace!("exposed window {}", id.0);
        Ok(Self {
            rma,
            id,
            live: true,
        })
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn put(&self, target: usize, offset: usize, words: &[u64]) -> Result<(), TransportError> {
        self.rma.put(self.id, target, offset, words)
    }

    pub fn read(&self) -> Result<Vec<u64>, TransportError> {
        self.rma.read(self.id)
    }

    /// Retract now and take the window memory back.
    pub fn retract(mut self) -> Result<Vec<u64>, TransportError> {
        self.live = false;
        self.rma.retract(self.id)
    }
}

impl Drop for ExposedWindow<'_> {
    fn drop(&mut self) {
        if self.live {
            // the error path already reported why the call failed
            let _ = self.rma.retract(self.id);
        }
    }
}
