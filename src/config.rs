//! Tuning surface of the exchange layer.
//!
//! Callers normally leave [`ExchangeConfig::strategy`] at [`Strategy::Auto`]
//! and let the selector pick; the remaining knobs tune that choice and the
//! one-sided variants. The whole struct is serde-(de)serializable with every
//! field defaulted, so a host can embed it in its own configuration file.

use crate::algs::communicator::CommTag;
use crate::exchange_error::ExchangeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which family of algorithms to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Let the selector decide from group size and list density.
    #[default]
    Auto,
    Dense,
    TwoStep,
    OneSided,
    ProclistRestricted,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Auto,
        Strategy::Dense,
        Strategy::TwoStep,
        Strategy::OneSided,
        Strategy::ProclistRestricted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Auto => "auto",
            Strategy::Dense => "dense",
            Strategy::TwoStep => "two_step",
            Strategy::OneSided => "one_sided",
            Strategy::ProclistRestricted => "proclist_restricted",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ExchangeError::InvalidConfig(format!("unknown strategy `{s}`")))
    }
}

/// How the process-list restricted strategy moves counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProclistMethod {
    /// Paired non-blocking send/receive per listed peer.
    #[default]
    IsendIrecv,
    /// One variable-count collective where only listed pairs carry data.
    Alltoallv,
    /// One-sided writes into listed targets only.
    Put,
}

/// Where a one-sided window's memory comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMemory {
    /// Scratch memory allocated for the call; the result is copied out.
    #[default]
    Dedicated,
    /// The result table itself is exposed and handed back on retraction.
    Caller,
}

/// Synchronization phases of a one-sided count exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutPhases {
    /// Expose, write, read. Requires `allow_two_phase`.
    Two,
    /// Expose, write, read, then acknowledge before any window is retracted.
    #[default]
    Three,
}

/// Memory mode × phase count of the one-sided variants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PutConfig {
    pub memory: WindowMemory,
    pub phases: PutPhases,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub strategy: Strategy,
    /// Below this group-wide density (widest list / group size) the selector
    /// picks process-list restricted algorithms.
    pub density_threshold: f64,
    /// Groups up to this size always use the dense strategy under `Auto`.
    pub small_group: usize,
    /// Dense patterns switch to the two-step grid from this group size on.
    pub two_step_min_group: usize,
    pub proclist_method: ProclistMethod,
    pub put: PutConfig,
    /// Opt-in for [`PutPhases::Two`].
    pub allow_two_phase: bool,
    /// Base tag; each phase uses a fixed offset from it.
    pub tag: CommTag,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Auto,
            density_threshold: 0.25,
            small_group: 8,
            two_step_min_group: 64,
            proclist_method: ProclistMethod::IsendIrecv,
            put: PutConfig::default(),
            allow_two_phase: false,
            tag: CommTag::default(),
        }
    }
}

impl ExchangeConfig {
    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// # Errors
    /// `InvalidConfig` for a threshold outside `[0, 1]`, a zero
    /// `two_step_min_group`, or two-phase puts without `allow_two_phase`.
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if !(0.0..=1.0).contains(&self.density_threshold) {
            return Err(ExchangeError::InvalidConfig(format!(
                "density_threshold {} outside [0, 1]",
                self.density_threshold
            )));
        }
        if self.two_step_min_group == 0 {
            return Err(ExchangeError::InvalidConfig(
                "two_step_min_group must be positive".into(),
            ));
        }
        if self.put.phases == PutPhases::Two && !self.allow_two_phase {
            return Err(ExchangeError::InvalidConfig(
                "two-phase puts need allow_two_phase = true".into(),
            ));
        }
        Ok(())
    }
}
