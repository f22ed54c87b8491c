// Frame phases
//
// Idle -> Acquired -> Recording -> Submitted -> Presented -> Idle
//
// Draws are only legal between begin_frame and end_frame. The renderer keeps
// one FramePhase and moves it through these functions, so calling things out
// of order fails loudly instead of corrupting the semaphore chain.

use crate::error::FatalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    #[default]
    Idle,
    /// A swapchain image is acquired, nothing recorded yet
    Acquired,
    /// At least one draw or clear was submitted this frame
    Recording,
    /// The copy to the swapchain image is submitted
    Submitted,
    Presented,
}

impl FramePhase {
    pub fn name(self) -> &'static str {
        match self {
            FramePhase::Idle => "idle",
            FramePhase::Acquired => "acquired",
            FramePhase::Recording => "recording",
            FramePhase::Submitted => "submitted",
            FramePhase::Presented => "presented",
        }
    }

    fn invalid(self, operation: &'static str) -> FatalError {
        FatalError::InvalidFrameState {
            operation,
            phase: self.name(),
        }
    }

    pub fn acquire(self) -> Result<Self, FatalError> {
        match self {
            FramePhase::Idle => Ok(FramePhase::Acquired),
            other => Err(other.invalid("begin_frame")),
        }
    }

    /// A draw or clear inside the frame
    pub fn record(self) -> Result<Self, FatalError> {
        match self {
            FramePhase::Acquired | FramePhase::Recording => Ok(FramePhase::Recording),
            other => Err(other.invalid("draw")),
        }
    }

    /// Frames without any draw still present the (stale) color target
    pub fn submit(self) -> Result<Self, FatalError> {
        match self {
            FramePhase::Acquired | FramePhase::Recording => Ok(FramePhase::Submitted),
            other => Err(other.invalid("end_frame")),
        }
    }

    pub fn present(self) -> Result<Self, FatalError> {
        match self {
            FramePhase::Submitted => Ok(FramePhase::Presented),
            other => Err(other.invalid("present")),
        }
    }

    pub fn finish(self) -> Result<Self, FatalError> {
        match self {
            FramePhase::Presented => Ok(FramePhase::Idle),
            other => Err(other.invalid("advance")),
        }
    }

    /// True once begin_frame succeeded and end_frame has not run yet
    pub fn in_frame(self) -> bool {
        matches!(self, FramePhase::Acquired | FramePhase::Recording)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_returns_to_idle() {
        let phase = FramePhase::Idle
            .acquire()
            .and_then(FramePhase::record)
            .and_then(FramePhase::record)
            .and_then(FramePhase::submit)
            .and_then(FramePhase::present)
            .and_then(FramePhase::finish)
            .unwrap();
        assert_eq!(phase, FramePhase::Idle);
    }

    #[test]
    fn empty_frame_can_be_ended() {
        let phase = FramePhase::Idle.acquire().and_then(FramePhase::submit).unwrap();
        assert_eq!(phase, FramePhase::Submitted);
    }

    #[test]
    fn draw_outside_frame_is_rejected() {
        let err = FramePhase::Idle.record().unwrap_err();
        assert!(matches!(
            err,
            FatalError::InvalidFrameState {
                operation: "draw",
                phase: "idle"
            }
        ));
    }

    #[test]
    fn double_begin_is_rejected() {
        let acquired = FramePhase::Idle.acquire().unwrap();
        assert!(acquired.acquire().is_err());
        assert!(acquired.in_frame());
        assert!(!FramePhase::Submitted.in_frame());
    }

    #[test]
    fn present_requires_submission() {
        assert!(FramePhase::Recording.present().is_err());
        assert!(FramePhase::Submitted.finish().is_err());
    }
}
