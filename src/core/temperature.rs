use std::fmt;

use serde::Serialize;

/// Lifecycle phase of an instance.
///
/// ```text
/// Init ──▶ Warm ──▶ Cooling ──▶ Cold
///   └──────────────────────────▲
/// ```
/// `Cold` is terminal. `Init → Cold` abandons a load that never warmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    Init,
    Warm,
    Cooling,
    Cold,
}

impl Temperature {
    /// Whether the administrative driver may move an instance from `self` to `next`.
    pub fn can_become(self, next: Temperature) -> bool {
        matches!(
            (self, next),
            (Temperature::Init, Temperature::Warm)
                | (Temperature::Init, Temperature::Cold)
                | (Temperature::Warm, Temperature::Cooling)
                | (Temperature::Cooling, Temperature::Cold)
        )
    }

    pub fn is_warm(self) -> bool {
        self == Temperature::Warm
    }

    pub fn is_cold(self) -> bool {
        self == Temperature::Cold
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Temperature::Init => "init",
            Temperature::Warm => "warm",
            Temperature::Cooling => "cooling",
            Temperature::Cold => "cold",
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(Temperature::Init.can_become(Temperature::Warm));
        assert!(Temperature::Warm.can_become(Temperature::Cooling));
        assert!(Temperature::Cooling.can_become(Temperature::Cold));
        assert!(Temperature::Init.can_become(Temperature::Cold));
    }

    #[test]
    fn test_cold_is_terminal() {
        for next in [
            Temperature::Init,
            Temperature::Warm,
            Temperature::Cooling,
            Temperature::Cold,
        ] {
            assert!(!Temperature::Cold.can_become(next));
        }
    }

    #[test]
    fn test_no_skipping_cooling() {
        assert!(!Temperature::Warm.can_become(Temperature::Cold));
        assert!(!Temperature::Cooling.can_become(Temperature::Warm));
    }
}
