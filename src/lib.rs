//! # claimpack
//!
//! Turn a shipping claim and its uploaded evidence into one printable PDF
//! packet, and store it exactly once per claim.
//!
//! ## Pipeline Overview
//!
//! ```text
//! claim id + caller
//!  │
//!  ├─ 1. Gate     owner check, then paid status / paid ledger entry / admin
//!  ├─ 2. Load     claim record and evidence manifest
//!  ├─ 3. Resolve  fetch evidence images concurrently, best-effort
//!  ├─ 4. Compose  summary, narrative, evidence index, one page per image
//!  ├─ 5. Write    lopdf serialization (CPU-bound, spawn_blocking)
//!  └─ 6. Persist  overwrite {owner}/{claim}/packet.pdf, upsert the packet row
//! ```
//!
//! The same claim, manifest and evidence bytes always produce the same PDF
//! bytes, so generation can be re-run freely.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use claimpack::store::{MemoryContentStore, MemoryRecordStore};
//! use claimpack::{Caller, PacketConfig, PacketService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = PacketService::new(
//!         Arc::new(MemoryRecordStore::new()),
//!         Arc::new(MemoryContentStore::new()),
//!         PacketConfig::default(),
//!     );
//!     let packet = service
//!         .generate_packet("6f1c1d7e-3a55-4a8e-9a53-0f1f1b9f7a10", Caller::system())
//!         .await?;
//!     eprintln!("{} pages, {} bytes", packet.page_count, packet.byte_len);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `claimpack` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! claimpack = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod narrative;
pub mod packet;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod validation;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PacketConfig, PacketConfigBuilder, PageLayout};
pub use error::{ErrorKind, EvidenceError, ModelError, PacketError, StoreError};
pub use model::{
    Carrier, ClaimRecord, ClaimStage, ClaimStatus, EvidenceFile, EvidenceKind, FilerRole, Insured, IssueType,
    PaymentRecord, PaymentStatus,
};
pub use narrative::synthesize;
pub use packet::{
    Caller, ClaimOverview, GeneratedPacket, NewEvidence, PacketDownload, PacketService, PaymentConfirmation,
    PaymentOutcome,
};
pub use pipeline::compose::{compose, Page, RenderedDocument};
pub use pipeline::pdf::write_pdf;
pub use pipeline::resolve::{resolve_images, DroppedEvidence, FetchedImage, ResolvedEvidence};
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use validation::{completeness, Completeness};
