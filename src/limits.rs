//! Per-bucket retention caps, with the hierarchical override merge
//! described in spec.md §3 (defaults -> per-subvolume -> per-remote).

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
}

impl Limits {
    /// Apply each override in order; only fields explicitly present in
    /// an override replace the corresponding field of `self`.
    pub fn merge(mut self, overrides: &[&OptionalLimits]) -> Self {
        for o in overrides {
            if let Some(h) = o.hourly {
                self.hourly = h;
            }
            if let Some(d) = o.daily {
                self.daily = d;
            }
            if let Some(w) = o.weekly {
                self.weekly = w;
            }
            if let Some(m) = o.monthly {
                self.monthly = m;
            }
        }
        self
    }
}

impl std::fmt::Display for Limits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hourly={}, daily={}, weekly={}, monthly={}",
            self.hourly, self.daily, self.weekly, self.monthly
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct OptionalLimits {
    pub hourly: Option<u32>,
    pub daily: Option<u32>,
    pub weekly: Option<u32>,
    pub monthly: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_only_replaces_present_fields() {
        let base = Limits {
            hourly: 1,
            daily: 2,
            weekly: 3,
            monthly: 4,
        };
        let over = OptionalLimits {
            hourly: Some(10),
            daily: None,
            weekly: Some(30),
            monthly: None,
        };

        let merged = base.merge(&[&over]);

        assert_eq!(
            merged,
            Limits {
                hourly: 10,
                daily: 2,
                weekly: 30,
                monthly: 4
            }
        );
    }

    #[test]
    fn merge_applies_in_order() {
        let base = Limits::default();
        let first = OptionalLimits {
            hourly: Some(1),
            ..Default::default()
        };
        let second = OptionalLimits {
            hourly: Some(2),
            ..Default::default()
        };

        let merged = base.merge(&[&first, &second]);

        assert_eq!(merged.hourly, 2);
    }
}
