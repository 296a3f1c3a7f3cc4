//! Swap chain descriptor and lifecycle state machine.

use crate::error::{ErrorKind, GraphicsError, Result};
use crate::format::TextureFormat;
use crate::WindowHandle;

/// Description of a swap chain. Creating one on a device that already has a
/// swap chain implicitly destroys the previous one.
#[derive(Clone, Debug)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Double or triple buffering.
    pub buffer_count: u32,
    pub vsync: bool,
    /// Opaque host window. `None` only makes sense on backends that can
    /// present headlessly (the software rasteriser).
    pub window: Option<WindowHandle>,
}

impl SwapchainDesc {
    pub fn new(width: u32, height: u32) -> SwapchainDesc {
        SwapchainDesc {
            width,
            height,
            format: TextureFormat::Bgra8Unorm,
            buffer_count: 2,
            vsync: true,
            window: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                "swap chain extent must be at least 1x1",
            ));
        }
        if !(2..=3).contains(&self.buffer_count) {
            return Err(GraphicsError::new(
                ErrorKind::ValidationError,
                format!("buffer count must be 2 or 3, got {}", self.buffer_count),
            ));
        }
        if self.format.is_depth_stencil() {
            return Err(GraphicsError::new(
                ErrorKind::IncompatibleFormat,
                "swap chain format must be a color format",
            ));
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------

/// Lifecycle of a swap chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SwapchainState {
    Uninitialised,
    Ready,
    /// Zero-area surface; presents succeed without doing GPU work.
    Minimised,
    /// Surface changed under us; only resize/recreate leads back to `Ready`.
    OutOfDate,
    Destroyed,
}

/// Events that drive [`SwapchainState`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SwapchainEvent {
    Create,
    /// Resize to a non-zero extent, or an explicit recreate.
    Resize,
    /// Resize with a zero width or height.
    ResizeZero,
    PresentFailed,
    Destroy,
}

impl SwapchainState {
    /// Applies `event`, consuming the previous state. Unlisted transitions
    /// are `InvalidOperation` and leave the caller's state untouched.
    pub fn transition(self, event: SwapchainEvent) -> Result<SwapchainState> {
        use SwapchainEvent as E;
        use SwapchainState as S;
        let next = match (self, event) {
            (S::Uninitialised, E::Create) => S::Ready,
            // recreating over a live swap chain is allowed and implicitly
            // destroys the old one
            (S::Ready | S::Minimised | S::OutOfDate, E::Create) => S::Ready,
            (S::Ready | S::Minimised | S::OutOfDate, E::Resize) => S::Ready,
            (S::Ready | S::Minimised | S::OutOfDate, E::ResizeZero) => S::Minimised,
            (S::Ready, E::PresentFailed) => S::OutOfDate,
            (_, E::Destroy) => S::Destroyed,
            (state, event) => {
                return Err(GraphicsError::new(
                    ErrorKind::InvalidOperation,
                    format!("swap chain cannot {:?} while {:?}", event, state),
                ))
            }
        };
        Ok(next)
    }

    pub fn can_present(self) -> bool {
        matches!(self, SwapchainState::Ready | SwapchainState::Minimised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_happy_path() {
        let s = SwapchainState::Uninitialised;
        let s = s.transition(SwapchainEvent::Create).unwrap();
        assert_eq!(s, SwapchainState::Ready);
        let s = s.transition(SwapchainEvent::ResizeZero).unwrap();
        assert_eq!(s, SwapchainState::Minimised);
        assert!(s.can_present());
        let s = s.transition(SwapchainEvent::Resize).unwrap();
        assert_eq!(s, SwapchainState::Ready);
        let s = s.transition(SwapchainEvent::PresentFailed).unwrap();
        assert_eq!(s, SwapchainState::OutOfDate);
        assert!(!s.can_present());
        let s = s.transition(SwapchainEvent::Resize).unwrap();
        assert_eq!(s, SwapchainState::Ready);
        let s = s.transition(SwapchainEvent::Destroy).unwrap();
        assert_eq!(s, SwapchainState::Destroyed);
    }

    #[test]
    fn illegal_transitions_rejected() {
        let err = SwapchainState::Uninitialised
            .transition(SwapchainEvent::Resize)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidOperation);
        assert!(SwapchainState::Destroyed
            .transition(SwapchainEvent::Create)
            .is_err());
    }

    #[test]
    fn desc_validation() {
        assert!(SwapchainDesc::new(1280, 720).validate().is_ok());
        assert!(SwapchainDesc::new(0, 720).validate().is_err());
        let mut desc = SwapchainDesc::new(1280, 720);
        desc.buffer_count = 4;
        assert!(desc.validate().is_err());
        let mut desc = SwapchainDesc::new(1280, 720);
        desc.format = TextureFormat::Depth32Float;
        assert!(desc.validate().is_err());
    }
}
