//! redeflate - optimizing re-encoder for single DEFLATE blocks.
//!
//! Takes an already-tokenized DEFLATE block (a textual dump of literals,
//! back-references and code-length tables) and searches for a semantically
//! equivalent representation with a smaller on-the-wire bit length. The
//! search couples four subsystems: an optimal LZ77 parse of the block text
//! under the current Huffman costs, optimal literal/length and distance
//! code-length assignment whose objective includes the run-length-encoded
//! cost of the tables themselves, an exhaustive chooser for the 19-symbol
//! code-length alphabet, and an outer loop (coordinate descent plus a
//! genetic search over CL tables and variable renamings) composing them.
//!
//! When the emitted bytes must survive embedding inside a Python string
//! literal, fitness additionally charges 8 bits per byte of escape
//! expansion.
//!
//! # Example
//!
//! ```
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use redeflate::deflate::{FixedBlock, Token};
//! use redeflate::{optimize_block, RleDpCache};
//!
//! let text = b"import zlib;import zlib\n";
//! let fixed = FixedBlock {
//!     bfinal: true,
//!     tokens: text.iter().map(|&b| Token::Literal(b)).collect(),
//! };
//! let mut block = fixed.to_dynamic();
//!
//! let mut cache = RleDpCache::new();
//! let mut rng = StdRng::seed_from_u64(0);
//! let before = block.bit_length(&mut cache)?;
//! optimize_block(&mut block, &[], true, 10, &mut cache, &mut rng)?;
//! assert!(block.bit_length(&mut cache)? <= before);
//! assert_eq!(block.decode(&[]), text);
//! # Ok::<(), redeflate::Error>(())
//! ```

pub mod bits;
pub mod cl;
pub mod deflate;
pub mod embed;
pub mod error;
pub mod ga;
pub mod huffman;
pub mod opt;
pub mod vars;

pub use cl::{choose_cl_lengths, RleDpCache};
pub use deflate::{Block, DynamicBlock, FixedBlock, StoredBlock, Token};
pub use error::{Error, Result};
pub use ga::{Ga, GaOptions, GaState};
pub use opt::{optimal_parse, optimize_block, optimize_dist_lengths, optimize_lit_lengths};
