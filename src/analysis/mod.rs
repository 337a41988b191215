//! Analysis Module - Address policy and target images
//!
//! Contains the step policy, ELF symbol loading and a.out header inspection.

pub mod aout;
pub mod loader;
pub mod policy;

pub use loader::{FunctionInfo, SymbolTable};
pub use policy::{AddressPolicy, Band, StepAction};
