pub mod canonical;

pub use canonical::{build_codes, is_kraft_equal, kraft_sum, lengths_from_frequencies};
