//! Cost tiers for import jobs
//!
//! A job's tier is derived from the number of users it asks to import.
//! Higher tiers allow fewer concurrent jobs and impose longer cooldowns
//! once a user overflows their limit.

use serde::{Deserialize, Serialize};

use super::error::AdmissionError;

// ============================================================================
// Tier
// ============================================================================

/// Cost tier of an import job
///
/// Ordering follows cost: `Small < Medium < Large < Xl`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Small,
    Medium,
    Large,
    Xl,
}

impl Tier {
    /// All tiers in ascending cost order
    pub const ALL: [Tier; 4] = [Tier::Small, Tier::Medium, Tier::Large, Tier::Xl];

    /// Canonical name used inside shared-store keys and values
    pub fn name(&self) -> &'static str {
        match self {
            Self::Small => "SMALL",
            Self::Medium => "MEDIUM",
            Self::Large => "LARGE",
            Self::Xl => "XL",
        }
    }

    /// Parse a tier from its canonical name
    pub fn from_name(name: &str) -> Result<Self, AdmissionError> {
        match name {
            "SMALL" => Ok(Self::Small),
            "MEDIUM" => Ok(Self::Medium),
            "LARGE" => Ok(Self::Large),
            "XL" => Ok(Self::Xl),
            _ => Err(AdmissionError::UnknownTier {
                name: name.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Tier limits
// ============================================================================

/// The three numbers each tier carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Upper bound on requested users for this tier (`u64::MAX` = unbounded)
    pub max_count: u64,

    /// Maximum concurrent jobs per user in this tier
    pub max_concurrent: u32,

    /// Cooldown applied when this tier's limit overflows
    pub cooldown_seconds: u64,
}

// ============================================================================
// Tier table
// ============================================================================

/// Immutable mapping from requested count to tier, plus per-tier limits
///
/// Classification is inclusive: the smallest tier whose `max_count` is at
/// least the requested count wins; anything beyond every finite bound
/// falls to [`Tier::Xl`].
#[derive(Debug, Clone)]
pub struct TierTable {
    limits: [TierLimits; 4],
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            limits: [
                TierLimits {
                    max_count: 100,
                    max_concurrent: 10,
                    cooldown_seconds: 5,
                },
                TierLimits {
                    max_count: 10_000,
                    max_concurrent: 5,
                    cooldown_seconds: 10,
                },
                TierLimits {
                    max_count: 100_000,
                    max_concurrent: 3,
                    cooldown_seconds: 20,
                },
                TierLimits {
                    max_count: u64::MAX,
                    max_concurrent: 1,
                    cooldown_seconds: 30,
                },
            ],
        }
    }
}

impl TierTable {
    /// Build a table from explicit limits, in `Tier::ALL` order
    ///
    /// Bounds must be strictly ascending and every `max_concurrent` must be
    /// at least 1; the last tier must be unbounded.
    pub fn new(limits: [TierLimits; 4]) -> Result<Self, AdmissionError> {
        for window in limits.windows(2) {
            if window[0].max_count >= window[1].max_count {
                return Err(AdmissionError::InvalidTierTable {
                    reason: "tier max_count bounds must be strictly ascending".to_string(),
                });
            }
        }
        if limits[3].max_count != u64::MAX {
            return Err(AdmissionError::InvalidTierTable {
                reason: "the last tier must be unbounded".to_string(),
            });
        }
        if let Some(bad) = Tier::ALL
            .iter()
            .zip(limits.iter())
            .find(|(_, l)| l.max_concurrent == 0)
        {
            return Err(AdmissionError::InvalidTierTable {
                reason: format!("{} max_concurrent must be at least 1", bad.0),
            });
        }
        Ok(Self { limits })
    }

    /// Classify a requested count into a tier
    pub fn classify(&self, count: u64) -> Tier {
        for (tier, limits) in Tier::ALL.iter().zip(self.limits.iter()) {
            if count <= limits.max_count {
                return *tier;
            }
        }
        Tier::Xl
    }

    /// Limits for a given tier
    pub fn limits(&self, tier: Tier) -> &TierLimits {
        &self.limits[tier as usize]
    }

    /// Maximum concurrent jobs for a tier
    pub fn max_concurrent(&self, tier: Tier) -> u32 {
        self.limits(tier).max_concurrent
    }

    /// Cooldown seconds for a tier
    pub fn cooldown_seconds(&self, tier: Tier) -> u64 {
        self.limits(tier).cooldown_seconds
    }
}

// ============================================================================
// Tests
// ============================================================================
