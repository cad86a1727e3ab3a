//! Uniform lifecycle shared by every hardware-facing subsystem (Contec, MotorControl,
//! ControlPanel): `initialize`/`reset`/`state`/`component_type`, so the orchestrator can drive
//! and report on all three through one interface instead of three bespoke ones.
use crate::types::{LedState, RobotComponent};
use crate::Result;

/// A component's current health, independent of what it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// never initialized, or reset back to this state
    Error,
    /// initialized and healthy
    Normal,
    /// initialized but degraded (used by components that distinguish a soft failure)
    Warning,
}

impl ComponentState {
    /// The LED color a status snapshot reports for this state.
    pub fn led_state(self) -> LedState {
        match self {
            ComponentState::Normal => LedState::On,
            ComponentState::Warning => LedState::Warning,
            ComponentState::Error => LedState::Error,
        }
    }
}

/// Shared capability implemented by every hardware subsystem.
pub trait Component {
    /// Which entry this component occupies in the component registry / status snapshot.
    fn component_type(&self) -> RobotComponent;
    /// Bring the component up: open connections, probe the device, clear Error state on success.
    fn initialize(&self) -> Result<()>;
    /// Tear the component back down to `Error` with its backend closed. Idempotent.
    fn reset(&self);
    /// The component's current health.
    fn state(&self) -> ComponentState;
}
