//! Licensed feature checks.
//!
//! Services and jobs receive an [`Entitlements`] implementation instead of reading
//! a process-wide license flag, so each caller decides what is unlocked.

use crate::config::settings::LicenseSettings;
use std::fmt::Debug;

/// Answers which paid features are available.
pub trait Entitlements: Send + Sync + Debug {
    /// Whether premium features (recurring rules, scheduled refresh) are unlocked.
    fn is_premium(&self) -> bool;
}

/// Entitlements granted by the deployment's license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct License {
    premium: bool,
}

impl License {
    /// Creates a license with the given premium flag.
    #[must_use]
    pub const fn new(premium: bool) -> Self {
        Self { premium }
    }

    /// Builds the license from the `[license]` settings section.
    #[must_use]
    pub const fn from_settings(settings: &LicenseSettings) -> Self {
        Self::new(settings.premium)
    }
}

impl Entitlements for License {
    fn is_premium(&self) -> bool {
        self.premium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_license_from_settings() {
        let license = License::from_settings(&LicenseSettings { premium: true });
        assert!(license.is_premium());
        assert!(!License::new(false).is_premium());
    }
}
