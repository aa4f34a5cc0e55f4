//! # Embedded-Tree B+Tree
//!
//! The index core: a B+tree whose nodes are packed many-per-block rather
//! than one-per-block. Each block carries its own small multi-level tree of
//! node slots, so a descent that would touch several disk pages in a
//! conventional layout resolves several levels inside one mapped block.
//!
//! ## Two Kinds of Edges
//!
//! The tree distinguishes edges that stay inside a block from edges that
//! cross into another one:
//!
//! - a NODE value names a slot index in the *same* block and is meaningless
//!   anywhere else;
//! - a BLOCK value names another block's ordinal position in the index file.
//!
//! Search follows NODE edges until a block's embedded tree bottoms out, then
//! hops the terminating BLOCK edge and starts over in the next block. Insert
//! restores capacity in the same two tiers: node splits stay inside a block
//! while it has height to spare; a block at maximum height splits into two
//! blocks.
//!
//! ## Module Layout
//!
//! - [`node`]: the packed node slot and the tagged [`Value`]
//! - [`search`]: intra-node and intra-block lookup
//! - [`tree`]: the [`Tree`] handle, bookkeeping and the cross-block descent
//! - [`insert`]: insert/update, node splits and block-height growth
//! - [`split`]: whole-block splits and subtree relocation
//! - [`cache`]: the opportunistic per-block tuple cache

pub mod cache;
pub mod insert;
pub mod node;
pub mod search;
pub mod split;
pub mod tree;

pub use node::Value;
pub use search::BlockHit;
pub use tree::{Lookup, Tree};
