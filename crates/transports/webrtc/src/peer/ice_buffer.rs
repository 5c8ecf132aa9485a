//! ICE candidates that arrive before the remote description

use crate::signaling::protocol::IceCandidate;

/// Holds remote candidates until the remote description is committed
///
/// Once [`mark_remote_description_set`](Self::mark_remote_description_set)
/// has drained the queue, later candidates pass straight through.
#[derive(Debug, Default)]
pub struct IceCandidateBuffer {
    pending: Vec<IceCandidate>,
    remote_description_set: bool,
}

impl IceCandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `candidate`, or hand it back if it can be applied now
    pub fn offer(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            self.pending.push(candidate);
            None
        }
    }

    /// Record that the remote description is set and take the queue, in
    /// arrival order. Returns nothing on later calls.
    pub fn mark_remote_description_set(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        std::mem::take(&mut self.pending)
    }

    pub fn is_remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Discard queued candidates
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
