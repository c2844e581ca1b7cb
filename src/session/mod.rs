//! Session lifecycle: the Idle/Starting/Streaming/Stopping state machine
//! and the controller that drives it.

pub mod controller;
pub mod state;

pub use controller::{
    ChannelFactory, ControlEvent, DeviceFactory, DictationController, SessionNotification,
};
pub use state::{SessionState, StateCell};
