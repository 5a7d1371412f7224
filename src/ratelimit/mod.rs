//! Sliding-window admission control.
//!
//! [`WindowStore`] holds per-key request timestamps and decides admission.
//! [`Sweeper`] evicts idle keys in the background. [`AdmissionLimiter`]
//! binds named policies and per-request rules on top of the store.

mod clock;
mod decision;
mod limiter;
mod policy;
mod store;
mod sweeper;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, Rejection, DEFAULT_MESSAGE, TOO_MANY_REQUESTS};
pub use limiter::{composite_key, Admission, AdmissionLimiter, AdmissionRule};
pub use policy::{Policy, PolicyConfig, PolicySet, Preset, TimeUnit};
pub use store::WindowStore;
pub use sweeper::{SweepSettings, Sweeper, DEFAULT_GRACE_PERIOD, DEFAULT_SWEEP_INTERVAL};
pub use window::WindowRecord;
