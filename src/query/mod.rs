pub mod parser;
pub mod request;
pub mod scorer;
pub mod searcher;
pub mod topk;

pub use parser::{parse_query, ParsedQuery, QueryNode};
pub use request::{SearchQuery, SortOn};
pub use scorer::Scorer;
pub use searcher::{RawHit, SearchOutcome, Searcher};
#[allow(unused_imports)]
pub use topk::{TopKEntry, TopKHeap};
