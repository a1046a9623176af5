//! Control engine: curve model, sample window and per-fan controller

pub mod controller;
mod curve;
mod window;

pub use controller::{
    clamp_target, ApplyOutcome, CalibrationGuard, FanControllerState, FanTempController,
    HoldReason, PwmWriter,
};
pub use curve::{interpolate, Curve, CurvePoint};
pub use window::SampleWindow;
