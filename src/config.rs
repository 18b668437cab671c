//! Configuration for packet generation.
//!
//! Everything the orchestrator needs beyond its two stores lives in
//! [`PacketConfig`]: bucket names, the admin allow-list, concurrency and
//! size limits, and the page geometry. The config is built once and handed
//! to [`crate::PacketService::new`]; the library never reads the environment
//! itself, so tests construct exactly the configuration they want.

use crate::error::PacketError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_UPLOADS_BUCKET: &str = "claim_uploads";
pub const DEFAULT_PACKETS_BUCKET: &str = "claim_packets";

/// Configuration for a [`crate::PacketService`].
///
/// Built via [`PacketConfig::builder()`] or using [`PacketConfig::default()`].
///
/// # Example
/// ```rust
/// use claimpack::PacketConfig;
///
/// let config = PacketConfig::builder()
///     .packets_bucket("packets-staging")
///     .admin_emails(["ops@example.com"])
///     .fetch_concurrency(8)
///     .build()
///     .unwrap();
/// assert!(config.is_admin_email("OPS@example.com"));
/// ```
#[derive(Clone)]
pub struct PacketConfig {
    /// Bucket holding uploaded evidence. Default: `claim_uploads`.
    pub uploads_bucket: String,

    /// Bucket holding rendered packets. Default: `claim_packets`.
    pub packets_bucket: String,

    /// Lower-cased e-mail addresses granted the admin override.
    pub admin_emails: Vec<String>,

    /// Evidence images fetched at once. Default: 4.
    pub fetch_concurrency: usize,

    /// Largest accepted upload in bytes. Default: 15 MiB.
    pub max_upload_bytes: usize,

    /// Lifetime of signed packet URLs in seconds. Default: 600.
    pub signed_url_ttl_secs: u64,

    /// Page geometry and wrap widths.
    pub layout: PageLayout,

    /// Optional per-generation progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            uploads_bucket: DEFAULT_UPLOADS_BUCKET.to_string(),
            packets_bucket: DEFAULT_PACKETS_BUCKET.to_string(),
            admin_emails: Vec::new(),
            fetch_concurrency: 4,
            max_upload_bytes: 15 * 1024 * 1024,
            signed_url_ttl_secs: 600,
            layout: PageLayout::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PacketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketConfig")
            .field("uploads_bucket", &self.uploads_bucket)
            .field("packets_bucket", &self.packets_bucket)
            .field("admin_emails", &self.admin_emails.len())
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("signed_url_ttl_secs", &self.signed_url_ttl_secs)
            .field("layout", &self.layout)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn GenerationProgressCallback>"),
            )
            .finish()
    }
}

impl PacketConfig {
    /// Create a new builder for `PacketConfig`.
    pub fn builder() -> PacketConfigBuilder {
        PacketConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether `email` is on the admin allow-list (case-insensitive).
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        !email.is_empty() && self.admin_emails.iter().any(|a| *a == email)
    }
}

/// Builder for [`PacketConfig`].
#[derive(Debug)]
pub struct PacketConfigBuilder {
    config: PacketConfig,
}

impl PacketConfigBuilder {
    pub fn uploads_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.uploads_bucket = bucket.into();
        self
    }

    pub fn packets_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.packets_bucket = bucket.into();
        self
    }

    /// Replace the admin allow-list. Entries are trimmed and lower-cased;
    /// blanks are dropped.
    pub fn admin_emails<I, S>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.admin_emails = emails
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn signed_url_ttl_secs(mut self, secs: u64) -> Self {
        self.config.signed_url_ttl_secs = secs;
        self
    }

    pub fn layout(mut self, layout: PageLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PacketConfig, PacketError> {
        let c = &self.config;
        if c.uploads_bucket.trim().is_empty() || c.packets_bucket.trim().is_empty() {
            return Err(PacketError::InvalidConfig("bucket names must not be empty".into()));
        }
        if c.max_upload_bytes == 0 {
            return Err(PacketError::InvalidConfig("max upload size must be ≥ 1 byte".into()));
        }
        if c.signed_url_ttl_secs == 0 {
            return Err(PacketError::InvalidConfig("signed URL lifetime must be ≥ 1s".into()));
        }
        c.layout.validate()?;
        Ok(self.config)
    }
}

// ── Page layout ──────────────────────────────────────────────────────────

/// Page geometry, in PDF points, and text wrap widths, in characters.
///
/// Wrapping is a character-count heuristic rather than measured glyph
/// width; the defaults keep 11 pt Helvetica inside the margins for typical
/// prose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    /// Default: 595.28 (A4).
    pub page_width: f32,
    /// Default: 841.89 (A4).
    pub page_height: f32,
    /// Applied on all four sides. Default: 50.
    pub margin: f32,
    /// Vertical advance per body line. Default: 14.
    pub line_height: f32,
    /// Narrative wrap width. Default: 100.
    pub narrative_wrap: usize,
    /// Evidence index wrap width. Default: 90.
    pub index_wrap: usize,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            page_width: 595.28,
            page_height: 841.89,
            margin: 50.0,
            line_height: 14.0,
            narrative_wrap: 100,
            index_wrap: 90,
        }
    }
}

impl PageLayout {
    /// Baseline of the first line on a page.
    pub fn top(&self) -> f32 {
        self.page_height - self.margin
    }

    /// Width available between the side margins.
    pub fn printable_width(&self) -> f32 {
        self.page_width - 2.0 * self.margin
    }

    /// Body lines that fit on a page started at the top margin.
    pub fn lines_per_page(&self) -> usize {
        ((self.top() - self.margin) / self.line_height).floor() as usize + 1
    }

    fn validate(&self) -> Result<(), PacketError> {
        if !(self.page_width > 0.0 && self.page_height > 0.0) {
            return Err(PacketError::InvalidConfig("page size must be positive".into()));
        }
        if self.margin < 0.0 || 2.0 * self.margin >= self.page_width.min(self.page_height) {
            return Err(PacketError::InvalidConfig(format!(
                "margin {} leaves no printable area",
                self.margin
            )));
        }
        if self.line_height <= 0.0 {
            return Err(PacketError::InvalidConfig("line height must be positive".into()));
        }
        if self.narrative_wrap < 20 || self.index_wrap < 20 {
            return Err(PacketError::InvalidConfig(format!(
                "wrap widths must be ≥ 20 characters, got {}/{}",
                self.narrative_wrap, self.index_wrap
            )));
        }
        Ok(())
    }
}
