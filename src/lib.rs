//! Polling core for a dual-channel oscilloscope go/no-go bench check.

pub mod controller;
pub mod error;
pub mod logging;
pub mod ng_state;
pub mod protocol;
pub mod scope;
pub mod settings;
pub mod transport;
pub mod waveform;

pub use controller::{Controller, NextSchedule, Scheduler, UiCallbacks};
pub use error::{OscilokError, Result};
pub use ng_state::NgState;
pub use scope::{DualChannelSource, Scope};
