#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod calc;
mod core;
mod error;
mod imap;
mod plan;
#[cfg(feature = "logging")]
mod utils;

pub use crate::calc::{Calc, CalcDef, Output};
pub use crate::core::{Assignment, Meta, Name, Translation, Value, merge};
pub use crate::error::*;
pub use crate::imap::IMap;
pub use crate::plan::{Plan, PlanBuilder};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
