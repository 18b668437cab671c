//! Pipeline stages for packet generation.
//!
//! Each submodule implements exactly one step. Only [`resolve`] performs
//! I/O; everything after it is a pure function of its inputs, which keeps
//! the packet reproducible and each stage testable without stores.
//!
//! ## Data Flow
//!
//! ```text
//! manifest ──▶ resolve ──▶ compose ──▶ pdf
//!             (fetch)    (layout)    (bytes)
//!                           │
//!                  wrap ────┤
//!                  image ───┘
//! ```
//!
//! 1. [`resolve`]: fetch evidence images concurrently, best-effort,
//!    restoring manifest order
//! 2. [`compose`]: lay out summary, narrative, evidence index and image
//!    pages; uses [`wrap`] for word wrapping and [`image`] for decoding
//! 3. [`pdf`]: serialize the page sequence with lopdf; runs in
//!    `spawn_blocking` together with [`compose`] because both are CPU-bound

pub mod compose;
pub mod image;
pub mod pdf;
pub mod resolve;
pub mod wrap;
