//! Flag resolution for ward.
//!
//! Given the regions that apply at a location, decide what a flag's value is
//! for a subject. Stronger regions win:
//!
//! 1. higher priority
//! 2. at equal priority, the deeper child
//! 3. then the lower id
//!
//! A region that sets nothing defers to its parent chain. Ancestors of a
//! region already examined are not examined again. The world's global region
//! only answers when no applicable region did.
//!
//! State flags (allow/deny) combine across every applicable region and any
//! deny wins. All other flags take the strongest region's value.

mod applicable;
mod calculator;
mod failed;
mod query;
mod result_set;

pub use applicable::ApplicableRegionSet;
pub use calculator::{FlagValueCalculator, Membership, association};
pub use failed::{FAILED_LOAD_MESSAGE, FailedLoadRegionSet};
pub use query::FlagQuery;
pub use result_set::RegionResultSet;
