//! Static site generation.
//!
//! - **provider**: parameter tuples per page
//! - **site**: one full generation pass
//! - **queue**: serialized regeneration worker used while serving

mod provider;
mod queue;
mod site;

pub use provider::Providers;
pub use queue::Regenerator;
pub use site::{GenerateReport, generate};
