//! # basalt-io: Block I/O Abstraction for Basalt
//!
//! This crate provides a trait-based abstraction over a single log file,
//! enabling the storage layer to use different I/O strategies:
//!
//! - **[`FileIo`]** (default): standard `std::fs` positioned reads and
//!   appends, used for all writes and normal reads
//! - **[`MmapIo`]**: a read-only memory map, used only during startup to
//!   accelerate index rebuild; the engine swaps it back to [`FileIo`]
//!   before the file receives any write
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │          basalt          │
//! │   (uses BlockIo trait)   │
//! └────────────┬─────────────┘
//!              │
//! ┌────────────┴─────────────┐
//! │        basalt-io         │
//! │  ┌─────────┐ ┌─────────┐ │
//! │  │ FileIo  │ │ MmapIo  │ │
//! │  └─────────┘ └─────────┘ │
//! └──────────────────────────┘
//! ```
//!
//! Handles are closed by dropping them; there is no explicit `close`.

mod backend;
mod error;
mod file;
mod mmap;

pub use backend::{BlockIo, IoKind, open_block_io};
pub use error::IoError;
pub use file::FileIo;
pub use mmap::MmapIo;
