//! Partitions creator state machine.

use std::fmt;

use tracing::debug;

use crate::connector::PartitionId;
use crate::error::ConnectorError;
use crate::feed::StreamId;

/// Lifecycle state of a partitions creator.
///
/// ```text
/// Created -> Splitting -> (Executing(p) -> Checkpointed(p))* -> Done
/// ```
///
/// `Created -> Done` is the zero-work path for a stream with no partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatorState {
    /// Built, nothing done yet.
    Created,
    /// Loading prior checkpoints and splitting the initial partition.
    Splitting,
    /// Reading the given partition.
    Executing(PartitionId),
    /// The given partition's rows are emitted and its checkpoint saved.
    Checkpointed(PartitionId),
    /// Finished. Terminal.
    Done,
}

impl CreatorState {
    /// Returns `true` if `next` may follow this state.
    #[must_use]
    pub fn can_advance(&self, next: &CreatorState) -> bool {
        match (self, next) {
            (Self::Created, Self::Splitting | Self::Done)
            | (Self::Splitting | Self::Checkpointed(_), Self::Executing(_) | Self::Done) => true,
            (Self::Executing(running), Self::Checkpointed(done)) => running == done,
            _ => false,
        }
    }
}

impl fmt::Display for CreatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Splitting => write!(f, "Splitting"),
            Self::Executing(p) => write!(f, "Executing({p})"),
            Self::Checkpointed(p) => write!(f, "Checkpointed({p})"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Tracks and validates the state of one creator, or of one concurrent
/// worker (which starts right after the split).
#[derive(Debug)]
pub(crate) struct Lifecycle {
    stream: StreamId,
    state: CreatorState,
}

impl Lifecycle {
    pub(crate) fn new(stream: StreamId) -> Self {
        Self {
            stream,
            state: CreatorState::Created,
        }
    }

    pub(crate) fn after_split(stream: StreamId) -> Self {
        Self {
            stream,
            state: CreatorState::Splitting,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &CreatorState {
        &self.state
    }

    pub(crate) fn advance(&mut self, next: CreatorState) -> Result<(), ConnectorError> {
        if !self.state.can_advance(&next) {
            return Err(ConnectorError::InvalidState {
                expected: format!("a successor of {}", self.state),
                actual: next.to_string(),
            });
        }
        debug!(stream = %self.stream, from = %self.state, to = %next, "creator state");
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(seq: u64) -> PartitionId {
        PartitionId::new(&StreamId::new(None, "t"), seq)
    }

    #[test]
    fn test_sequential_path() {
        let mut lifecycle = Lifecycle::new(StreamId::new(None, "t"));
        lifecycle.advance(CreatorState::Splitting).unwrap();
        for seq in 0..3 {
            lifecycle.advance(CreatorState::Executing(pid(seq))).unwrap();
            lifecycle.advance(CreatorState::Checkpointed(pid(seq))).unwrap();
        }
        lifecycle.advance(CreatorState::Done).unwrap();
        assert_eq!(lifecycle.state(), &CreatorState::Done);
    }

    #[test]
    fn test_zero_work_path() {
        let mut lifecycle = Lifecycle::new(StreamId::new(None, "t"));
        lifecycle.advance(CreatorState::Done).unwrap();
        assert!(lifecycle.advance(CreatorState::Splitting).is_err());
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!CreatorState::Created.can_advance(&CreatorState::Executing(pid(0))));
        assert!(!CreatorState::Executing(pid(0)).can_advance(&CreatorState::Done));
        assert!(!CreatorState::Executing(pid(0)).can_advance(&CreatorState::Checkpointed(pid(1))));
        assert!(!CreatorState::Executing(pid(0)).can_advance(&CreatorState::Executing(pid(1))));
        assert!(!CreatorState::Done.can_advance(&CreatorState::Done));

        let mut worker = Lifecycle::after_split(StreamId::new(None, "t"));
        let err = worker.advance(CreatorState::Checkpointed(pid(2))).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidState { .. }));
    }
}
