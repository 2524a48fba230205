//! Utility functions and data structures.
//!
//! - [`app_data`] - Configuration and app data directory management (XDG-compliant)
//! - [`distance`] - Levenshtein and prefix edit distances for suggest
//! - [`encoding`] - Varints, delta lists and a bounds-checked byte cursor
//! - [`logging`] - `tracing` subscriber setup for the binary
//! - [`tokenizer`] - Word analyzer, word-start n-grams and keyword splitting
//!
//! ```no_run
//! use fedsearch::utils::{Analyzer, word_ngrams};
//!
//! let words = Analyzer::default().words("All Waves, Rise now");
//! // ["all", "waves", "rise", "now"]
//!
//! let grams = word_ngrams("shield", 2, 4);
//! // ["sh", "shi", "shie"]
//! ```

pub mod app_data;
pub mod distance;
pub mod encoding;
pub mod logging;
pub mod tokenizer;

pub use app_data::*;
pub use distance::*;
pub use encoding::*;
pub use logging::{init_logging, log_filter};
pub use tokenizer::*;
