//! Routing
//!
//! ```text
//!                 ┌──────────────────────┐
//!   content ────> │    ResponseMerger    │
//!                 │ split, classify      │
//!                 └───┬──────────────┬───┘
//!              marked │              │ unmarked
//!                     v              v
//!             ┌─────────────┐  ┌─────────────┐
//!             │ DeepL pool  │  │  text pool  │  (chat or completion)
//!             └──────┬──────┘  └──────┬──────┘
//!                    └──── merge ─────┘
//! ```
//!
//! Both pools run concurrently; results are merged back by original index.

pub mod merger;
pub mod pool;

pub use merger::{merge, Indexed, ResponseMerger};
pub use pool::{pad_single, unpad_single, BackendPool, PoolStats};
