//! Per-panel state: encoded image cache, button labels, and the press gate.

pub mod codec;
pub mod gate;
pub mod labels;
pub mod resource;

pub use codec::{EncodeError, Frame, FrameEncoder, ImageEncoder, ImageFormat};
pub use gate::PressGate;
pub use labels::{ButtonLabels, BUTTONS_PER_SIDE};
pub use resource::{next_version, FollowerKind, ImageLease, ImagePoll, PanelResource};
