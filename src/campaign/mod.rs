//! Campaign generators: structured benchmark modes that build transfer sets
//! and drive the engine over them.

pub mod a2a;
pub mod p2p;
pub mod scaling;
pub mod sweep;

pub use a2a::{build_a2a_transfers, run_a2a};
pub use p2p::{build_pair, enumerate_endpoints, run_p2p, Endpoint};
pub use scaling::{run_scaling, ScalingOutcome};
pub use sweep::{build_universe, run_sweep, SubsetEnumerator, SweepOutcome, Triplet};
