//! Search hits, merged result sets and hit ordering.

pub mod compare;
mod hit;
mod merge;

pub use compare::{ContainerPaths, FlatPaths, RelevanceWeights, SortContext, StaticPaths, sort_hits};
pub use hit::{SearchHit, UNSPECIFIED_CONTAINER};
pub use merge::{SearchResults, SuggestResults};
