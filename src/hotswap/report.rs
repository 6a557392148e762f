//! The result of a hotswap attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::{HotswapMode, HotswappableChange, NonHotswappableChange};

/// What a hotswap attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotswapStatus {
    /// Nothing changed.
    NoOp,
    /// Changes were classified but not applied.
    Planned,
    /// Hotswappable changes were applied.
    Applied,
    /// Some change needs a full deployment; nothing was applied.
    FallBackRequired,
    /// Hotswapping is disabled for this deployment.
    Bypassed,
}

impl fmt::Display for HotswapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Planned => "planned",
            Self::Applied => "applied",
            Self::FallBackRequired => "fall-back-required",
            Self::Bypassed => "bypassed",
        };
        f.write_str(s)
    }
}

/// A hotswappable change without its patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotswappableSummary {
    /// Resource type of the changed resource.
    pub resource_type: String,
    /// Properties the patch covers.
    pub props_changed: Vec<String>,
    /// Service the patch talks to.
    pub service: String,
    /// Resources the patch touches.
    pub resource_names: Vec<String>,
}

impl From<&HotswappableChange> for HotswappableSummary {
    fn from(change: &HotswappableChange) -> Self {
        Self {
            resource_type: change.resource_type.clone(),
            props_changed: change.props_changed.clone(),
            service: change.service.to_string(),
            resource_names: change.resource_names.clone(),
        }
    }
}

/// Report of one hotswap attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotswapReport {
    /// Mode the attempt ran in.
    pub mode: HotswapMode,
    /// Outcome of the attempt.
    pub status: HotswapStatus,
    /// Changes that were, or would be, hotswapped.
    pub hotswappable: Vec<HotswappableSummary>,
    /// Changes that need a full deployment.
    pub non_hotswappable: Vec<NonHotswappableChange>,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
}

impl HotswapReport {
    /// Creates a report stamped with the current time.
    #[must_use]
    pub fn new(
        mode: HotswapMode,
        status: HotswapStatus,
        hotswappable: Vec<HotswappableSummary>,
        non_hotswappable: Vec<NonHotswappableChange>,
    ) -> Self {
        Self {
            mode,
            status,
            hotswappable,
            non_hotswappable,
            created_at: Utc::now(),
        }
    }

    /// Returns true if the caller must run a full deployment.
    #[must_use]
    pub fn requires_full_deployment(&self) -> bool {
        matches!(self.status, HotswapStatus::FallBackRequired | HotswapStatus::Bypassed)
    }

    /// Non-hotswappable changes worth showing to the operator in this mode.
    pub fn advisories(&self) -> impl Iterator<Item = &NonHotswappableChange> {
        let hotswap_only = self.mode == HotswapMode::HotswapOnly;
        self.non_hotswappable
            .iter()
            .filter(move |change| !hotswap_only || change.hotswap_only_visible)
    }

    /// Total number of resource names touched by hotswappable changes.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.hotswappable.iter().map(|c| c.resource_names.len()).sum()
    }
}
