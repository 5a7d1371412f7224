//! Gatekeeper - In-process Admission Control
//!
//! This crate implements a per-key sliding-window rate limiter for sensitive
//! operations such as logins, sign-ups, password resets and uploads. State is
//! process-local; a background sweep bounds memory by evicting idle keys.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use config::GatekeeperConfig;
pub use error::{GatekeeperError, Result};
pub use ratelimit::{
    Admission, AdmissionLimiter, AdmissionRule, Decision, Policy, PolicySet, Preset, Rejection,
    SweepSettings, Sweeper, WindowRecord, WindowStore,
};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    #[test]
    fn test_root_exports_cover_admission_flow() {
        let limiter = crate::AdmissionLimiter::new();
        let policy = crate::Policy::new(Duration::from_secs(60), 1);
        let rule = crate::AdmissionRule::new("login", policy, |ip: &&str| ip.to_string());

        assert!(matches!(limiter.admit(&rule, &"10.0.0.1"), crate::Admission::Allowed(_)));
        let crate::Admission::Denied(rejection) = limiter.admit(&rule, &"10.0.0.1") else {
            panic!("second attempt should be denied");
        };
        let decision: crate::Decision = rejection.decision;
        assert!(decision.is_denied());

        let policies: crate::PolicySet = limiter.policies();
        assert_eq!(policies.preset(crate::Preset::Auth).max_requests(), 5);
        assert!(matches!(
            policies.require("missing"),
            Err(crate::GatekeeperError::UnknownPolicy(_))
        ));
    }
}
