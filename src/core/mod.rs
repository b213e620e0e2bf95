pub mod config;
pub mod parse;
pub mod transfer;
pub mod types;

pub use config::{P2pMode, RunConfig, SweepConfig, UnitOrder, ValidatePolicy};
pub use transfer::{ElemPtr, SubExecParam, Transfer};
pub use types::{ExeKey, ExeKind, MemKind, MemLoc};
