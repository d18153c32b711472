//! The seam between the server and the host simulation.

use std::sync::Arc;

use crate::panel::{ButtonLabels, PanelResource};

/// Button ids with a special meaning on the wire.
pub const SELECT_BUTTON: i32 = 13;
pub const MENU_BUTTON: i32 = 14;
pub const POWER_BUTTON: i32 = 99;

/// A decoded button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    /// One of the soft keys along the panel edges.
    Button(u32),
    /// Menu select (id 13).
    Select,
    /// Menu toggle (id 14).
    Menu,
    /// Power off (id 99); also closes the panel.
    Power,
}

impl ButtonAction {
    /// Map a wire id to an action. Negative ids mean "query only".
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            SELECT_BUTTON => Some(Self::Select),
            MENU_BUTTON => Some(Self::Menu),
            POWER_BUTTON => Some(Self::Power),
            n if n >= 0 => Some(Self::Button(n as u32)),
            _ => None,
        }
    }
}

/// Host-side operations, only ever called from the host tick.
///
/// Implementations own the instrument rendering: they may keep the panel
/// handle from `register` and push frames with [`PanelResource::set_frame`]
/// at their own cadence; `refresh` asks for one frame right now.
pub trait PanelHost {
    /// Attach the panel to the host. Returning `false` rejects it; the panel
    /// then never produces frames.
    fn register(&mut self, panel: &Arc<PanelResource>) -> bool;

    fn unregister(&mut self, panel: &Arc<PanelResource>);

    /// Render the panel now, outside the host's own cadence.
    fn refresh(&mut self, panel: &Arc<PanelResource>);

    fn press(&mut self, panel: &Arc<PanelResource>, action: ButtonAction);

    /// Current soft-key labels of the panel.
    fn labels(&mut self, panel: &Arc<PanelResource>) -> ButtonLabels;
}
