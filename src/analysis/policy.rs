//! Address classification policy
//!
//! Decides per stop whether to trace-and-step or to finish the current frame.
//! A policy is a list of bands keyed by an exclusive lower bound ("floor"),
//! checked from the highest floor down; the fallback covers everything at or
//! below the lowest floor.
//!
//! The default table encodes the memory layout of one 32-bit target:
//!
//! | pc                             | action |
//! |--------------------------------|--------|
//! | `> 0xf7000000`                 | finish |
//! | `(0x5ffff000, 0xf7000000]`     | trace  |
//! | `(0x50000000, 0x5ffff000]`     | finish |
//! | `<= 0x50000000`                | trace  |

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::debug::types::parse_address;

/// What to do at a given pc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Run until the current frame returns; nothing is dumped
    Finish,
    /// Dump state, then execute one instruction
    Trace,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Finish => write!(f, "finish"),
            StepAction::Trace => write!(f, "trace"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Unknown action `{0}` (expected finish or trace)")]
    UnknownAction(String),
    #[error("Invalid band `{0}` (expected ADDR=ACTION)")]
    InvalidBand(String),
    #[error("Duplicate band floor {0:#x}")]
    DuplicateFloor(u64),
}

impl FromStr for StepAction {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "finish" => Ok(StepAction::Finish),
            "trace" | "step" => Ok(StepAction::Trace),
            other => Err(PolicyError::UnknownAction(other.to_string())),
        }
    }
}

/// Addresses strictly above `floor` (up to the next band) map to `action`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub floor: u64,
    pub action: StepAction,
}

impl FromStr for Band {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (floor, action) = s
            .split_once('=')
            .ok_or_else(|| PolicyError::InvalidBand(s.to_string()))?;
        let floor = parse_address(floor).map_err(|_| PolicyError::InvalidBand(s.to_string()))?;
        Ok(Band {
            floor,
            action: action.parse()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPolicy {
    /// Sorted by floor, highest first
    bands: Vec<Band>,
    fallback: StepAction,
}

impl AddressPolicy {
    pub fn new(mut bands: Vec<Band>, fallback: StepAction) -> Result<Self, PolicyError> {
        bands.sort_by(|a, b| b.floor.cmp(&a.floor));
        if let Some(pair) = bands.windows(2).find(|w| w[0].floor == w[1].floor) {
            return Err(PolicyError::DuplicateFloor(pair[0].floor));
        }
        Ok(Self { bands, fallback })
    }

    pub fn classify(&self, pc: u64) -> StepAction {
        self.bands
            .iter()
            .find(|band| pc > band.floor)
            .map(|band| band.action)
            .unwrap_or(self.fallback)
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn fallback(&self) -> StepAction {
        self.fallback
    }
}

impl Default for AddressPolicy {
    fn default() -> Self {
        Self {
            bands: vec![
                Band { floor: 0xf700_0000, action: StepAction::Finish },
                Band { floor: 0x5fff_f000, action: StepAction::Trace },
                Band { floor: 0x5000_0000, action: StepAction::Finish },
            ],
            fallback: StepAction::Trace,
        }
    }
}

impl fmt::Display for AddressPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for band in &self.bands {
            write!(f, "> {:#x}: {}, ", band.floor, band.action)?;
        }
        write!(f, "otherwise: {}", self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bands() {
        let policy = AddressPolicy::default();

        assert_eq!(policy.classify(0xffff_e000), StepAction::Finish);
        assert_eq!(policy.classify(0xf700_0001), StepAction::Finish);

        assert_eq!(policy.classify(0xf700_0000), StepAction::Trace);
        assert_eq!(policy.classify(0xbfff_f000), StepAction::Trace);
        assert_eq!(policy.classify(0x5fff_f001), StepAction::Trace);

        assert_eq!(policy.classify(0x5fff_f000), StepAction::Finish);
        assert_eq!(policy.classify(0x5000_0001), StepAction::Finish);

        assert_eq!(policy.classify(0x5000_0000), StepAction::Trace);
        assert_eq!(policy.classify(0x0804_8000), StepAction::Trace);
        assert_eq!(policy.classify(0), StepAction::Trace);
    }

    #[test]
    fn test_custom_policy_is_sorted() {
        let policy = AddressPolicy::new(
            vec![
                Band { floor: 0x1000, action: StepAction::Finish },
                Band { floor: 0x8000, action: StepAction::Trace },
            ],
            StepAction::Finish,
        )
        .unwrap();

        assert_eq!(policy.bands()[0].floor, 0x8000);
        assert_eq!(policy.classify(0x9000), StepAction::Trace);
        assert_eq!(policy.classify(0x8000), StepAction::Finish);
        assert_eq!(policy.classify(0x1000), StepAction::Finish);
    }

    #[test]
    fn test_duplicate_floor() {
        let err = AddressPolicy::new(
            vec![
                Band { floor: 0x1000, action: StepAction::Finish },
                Band { floor: 0x1000, action: StepAction::Trace },
            ],
            StepAction::Trace,
        )
        .unwrap_err();
        assert_eq!(err, PolicyError::DuplicateFloor(0x1000));
    }

    #[test]
    fn test_parse_band() {
        assert_eq!(
            "0xf7000000=finish".parse::<Band>(),
            Ok(Band { floor: 0xf700_0000, action: StepAction::Finish })
        );
        assert_eq!(
            "4096=step".parse::<Band>(),
            Ok(Band { floor: 4096, action: StepAction::Trace })
        );
        assert!(matches!("0x1000".parse::<Band>(), Err(PolicyError::InvalidBand(_))));
        assert!(matches!(
            "0x1000=skip".parse::<Band>(),
            Err(PolicyError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_display() {
        let policy = AddressPolicy::new(
            vec![Band { floor: 0x10, action: StepAction::Finish }],
            StepAction::Trace,
        )
        .unwrap();
        assert_eq!(policy.to_string(), "> 0x10: finish, otherwise: trace");
    }
}
