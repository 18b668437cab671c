//! CLI binary for claimpack.
//!
//! A thin shim over the library crate. Records live in a JSON snapshot and
//! blobs in a directory tree, both under `--data-dir`:
//!
//! ```text
//! {data-dir}/records.json
//! {data-dir}/blobs/{bucket}/{owner}/{claim}/...
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use claimpack::store::{FsContentStore, MemoryRecordStore, Snapshot};
use claimpack::{
    Caller, EvidenceKind, GeneratedPacket, GenerationProgressCallback, NewEvidence, PacketConfig,
    PacketService, PaymentConfirmation, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the evidence fetches, one log
/// line per image. Fetches complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    dropped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading claim…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            dropped: AtomicUsize::new(0),
        })
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_generation_start(&self, claim_id: &str, image_count: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} images  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(image_count as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Fetching");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Generating packet for claim {claim_id} ({image_count} images)…"))
        ));
    }

    fn on_evidence_fetched(&self, index: usize, total: usize, name: &str) {
        self.bar
            .println(format!("  {} Image {:>3}/{:<3}  {}", green("✓"), index, total, dim(name)));
        self.bar.inc(1);
    }

    fn on_evidence_dropped(&self, index: usize, total: usize, reason: &str) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        let msg = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar
            .println(format!("  {} Image {:>3}/{:<3}  {}", red("✗"), index, total, red(&msg)));
        self.bar.inc(1);
    }

    fn on_composed(&self, page_count: usize) {
        self.bar.set_prefix("Writing");
        self.bar.set_message(format!("{page_count} pages"));
    }

    fn on_stored(&self, storage_path: &str, byte_len: usize) {
        self.bar.finish_and_clear();
        let dropped = self.dropped.load(Ordering::SeqCst);
        eprintln!(
            "{} Stored {}  {}{}",
            if dropped == 0 { green("✔") } else { cyan("⚠") },
            bold(storage_path),
            dim(&format!("{byte_len} bytes")),
            if dropped == 0 {
                String::new()
            } else {
                red(&format!("  ({dropped} images left out)"))
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate (requires a paid claim, or an admin e-mail)
  claimpack --user $USER_ID generate 6f1c1d7e-3a55-4a8e-9a53-0f1f1b9f7a10

  # Download to a file, generating first if needed
  claimpack --user $USER_ID download 6f1c1d7e-... -o packet.pdf

  # Record a completed checkout and generate
  claimpack --user $USER_ID confirm-payment 6f1c1d7e-... --session cs_test_123 --amount 1900

  # Attach and remove evidence on a draft claim
  claimpack --user $USER_ID attach 6f1c1d7e-... photos/box.jpg --kind damage_photo
  claimpack --user $USER_ID remove 6f1c1d7e-... 2b8e...

  # Completeness and packet availability as JSON
  claimpack --user $USER_ID --json status 6f1c1d7e-...

EVIDENCE KINDS:
  proof_of_value, damage_photo, packaging_photo, proof_of_delivery, other_supporting

ENVIRONMENT VARIABLES:
  CLAIMPACK_DATA_DIR       Data directory (records.json + blobs/)
  CLAIMPACK_USER           Acting user id
  CLAIMPACK_EMAIL          Acting user e-mail (checked against the admin list)
  CLAIMPACK_ADMIN_EMAILS   Comma-separated admin e-mails
  RUST_LOG                 Override log filter
"#;

/// Generate and manage shipping claim packets.
#[derive(Parser, Debug)]
#[command(
    name = "claimpack",
    version,
    about = "Generate and manage shipping claim packets",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding records.json and the blob tree.
    #[arg(long, env = "CLAIMPACK_DATA_DIR", default_value = "claimpack-data", global = true)]
    data_dir: PathBuf,

    /// Acting user id.
    #[arg(long, env = "CLAIMPACK_USER", global = true)]
    user: Option<Uuid>,

    /// Acting user e-mail; admins bypass ownership and payment checks.
    #[arg(long, env = "CLAIMPACK_EMAIL", global = true)]
    email: Option<String>,

    /// Comma-separated admin e-mail allow-list.
    #[arg(long, env = "CLAIMPACK_ADMIN_EMAILS", value_delimiter = ',', global = true)]
    admin_emails: Vec<String>,

    /// Bucket holding uploaded evidence.
    #[arg(long, env = "CLAIMPACK_UPLOADS_BUCKET", default_value = "claim_uploads", global = true)]
    uploads_bucket: String,

    /// Bucket holding rendered packets.
    #[arg(long, env = "CLAIMPACK_PACKETS_BUCKET", default_value = "claim_packets", global = true)]
    packets_bucket: String,

    /// Evidence images fetched at once.
    #[arg(short, long, env = "CLAIMPACK_CONCURRENCY", default_value_t = 4, global = true)]
    concurrency: usize,

    /// Largest accepted upload, in MiB.
    #[arg(long, env = "CLAIMPACK_MAX_UPLOAD_MB", default_value_t = 15, global = true)]
    max_upload_mb: usize,

    /// Output structured JSON instead of text.
    #[arg(long, env = "CLAIMPACK_JSON", global = true)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CLAIMPACK_NO_PROGRESS", global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CLAIMPACK_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CLAIMPACK_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and store the packet for a claim.
    Generate {
        claim_id: String,
        /// Also write the packet to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write the stored packet to a file, generating it if needed.
    Download {
        claim_id: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print a signed URL for the stored packet.
    Url { claim_id: String },
    /// Record a completed checkout, mark the claim paid and generate.
    ConfirmPayment {
        claim_id: Uuid,
        /// Checkout session id; repeated confirmations with the same id update one entry.
        #[arg(long)]
        session: String,
        #[arg(long)]
        intent: Option<String>,
        /// Amount in cents.
        #[arg(long)]
        amount: Option<i64>,
        #[arg(long, default_value = "usd")]
        currency: String,
    },
    /// Attach a file to a draft claim.
    Attach {
        claim_id: String,
        file: PathBuf,
        #[arg(long, value_parser = parse_kind)]
        kind: EvidenceKind,
        /// MIME type; guessed from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,
    },
    /// Remove a file from a draft claim.
    Remove { claim_id: String, file_id: String },
    /// Show status, completeness and packet availability.
    Status { claim_id: String },
}

fn parse_kind(s: &str) -> std::result::Result<EvidenceKind, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is set.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    // ── Stores and service ───────────────────────────────────────────────
    let snapshot_path = cli.data_dir.join("records.json");
    let snapshot = Snapshot::load(&snapshot_path)
        .await
        .with_context(|| format!("Failed to read {}", snapshot_path.display()))?;
    let records = Arc::new(MemoryRecordStore::from_snapshot(snapshot).context("Invalid records snapshot")?);
    let content = Arc::new(FsContentStore::new(cli.data_dir.join("blobs")));

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn GenerationProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let service = PacketService::new(records.clone(), content, config);

    let mutated = run(&cli, &service).await?;

    if mutated {
        records
            .snapshot()
            .await
            .save(&snapshot_path)
            .await
            .with_context(|| format!("Failed to write {}", snapshot_path.display()))?;
    }
    Ok(())
}

/// Execute the subcommand. Returns whether records changed.
async fn run(cli: &Cli, service: &PacketService) -> Result<bool> {
    match &cli.command {
        Command::Generate { claim_id, output } => {
            let caller = caller(cli, service)?;
            let packet = service
                .generate_packet(claim_id, caller)
                .await
                .context("Packet generation failed")?;
            if let Some(path) = output {
                let download = service.download_packet(claim_id, caller).await.context("Download failed")?;
                write_atomic(path, &download.bytes).await?;
            }
            report_packet(cli, &packet)?;
            Ok(true)
        }

        Command::Download { claim_id, output } => {
            let caller = caller(cli, service)?;
            let download = service.download_packet(claim_id, caller).await.context("Download failed")?;
            write_atomic(output, &download.bytes).await?;
            if !cli.quiet {
                eprintln!(
                    "{}  {}  →  {}",
                    green("✔"),
                    dim(&format!("{} bytes", download.bytes.len())),
                    bold(&output.display().to_string())
                );
            }
            // Download may have generated the packet.
            Ok(true)
        }

        Command::Url { claim_id } => {
            let caller = caller(cli, service)?;
            let url = service.packet_url(claim_id, caller).await.context("Could not sign packet URL")?;
            if cli.json {
                println!("{}", serde_json::json!({ "url": url }));
            } else {
                println!("{url}");
            }
            Ok(false)
        }

        Command::ConfirmPayment {
            claim_id,
            session,
            intent,
            amount,
            currency,
        } => {
            let owner_id = cli.user.context("--user is required")?;
            let outcome = service
                .confirm_payment(PaymentConfirmation {
                    claim_id: *claim_id,
                    owner_id,
                    checkout_session_id: session.clone(),
                    payment_intent_id: intent.clone(),
                    amount_cents: *amount,
                    currency: currency.clone(),
                })
                .await
                .context("Payment confirmation failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?);
            } else if !cli.quiet {
                eprintln!("{} Claim {} is {}", green("✔"), outcome.claim_id, bold(outcome.status.label()));
                if let Some(ref e) = outcome.generation_error {
                    eprintln!("{} Packet generation failed: {}", cyan("⚠"), red(e));
                }
            }
            Ok(true)
        }

        Command::Attach {
            claim_id,
            file,
            kind,
            mime,
        } => {
            let caller = caller(cli, service)?;
            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            let mime_type = mime.clone().or_else(|| guess_mime(file).map(String::from));
            let attached = service
                .attach_evidence(
                    claim_id,
                    caller,
                    NewEvidence {
                        kind: *kind,
                        file_name,
                        mime_type,
                        bytes,
                    },
                )
                .await
                .context("Attach failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&attached).context("Failed to serialise file")?);
            } else {
                println!("{}", attached.id);
            }
            Ok(true)
        }

        Command::Remove { claim_id, file_id } => {
            let caller = caller(cli, service)?;
            service
                .remove_evidence(claim_id, file_id, caller)
                .await
                .context("Remove failed")?;
            if !cli.quiet {
                eprintln!("{} Removed {}", green("✔"), file_id);
            }
            Ok(true)
        }

        Command::Status { claim_id } => {
            let caller = caller(cli, service)?;
            let overview = service
                .claim_overview(claim_id, caller)
                .await
                .context("Could not load claim")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&overview).context("Failed to serialise status")?);
            } else {
                println!("Claim:        {}", overview.claim_id);
                println!("Status:       {}", overview.status.label());
                println!("Complete:     {}%", overview.completeness.percent);
                if !overview.completeness.missing.is_empty() {
                    println!("Missing:      {}", overview.completeness.missing.join(", "));
                }
                println!("Evidence:     {} files", overview.evidence_count);
                println!("Packet:       {}", if overview.packet_available { "available" } else { "not generated" });
            }
            Ok(false)
        }
    }
}

fn caller(cli: &Cli, service: &PacketService) -> Result<Caller> {
    let Some(user) = cli.user else {
        bail!("--user (or CLAIMPACK_USER) is required");
    };
    Ok(service.caller(user, cli.email.as_deref()))
}

/// Map CLI args to `PacketConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PacketConfig> {
    let mut builder = PacketConfig::builder()
        .uploads_bucket(&cli.uploads_bucket)
        .packets_bucket(&cli.packets_bucket)
        .admin_emails(&cli.admin_emails)
        .fetch_concurrency(cli.concurrency)
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024));
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn report_packet(cli: &Cli, packet: &GeneratedPacket) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(packet).context("Failed to serialise packet")?);
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }
    eprintln!(
        "   {} pages ({} images)  {}",
        packet.page_count,
        packet.image_pages,
        dim(&format!("{} bytes", packet.byte_len))
    );
    for d in &packet.dropped {
        eprintln!(
            "   {} left out {}: {}",
            cyan("⚠"),
            d.name.as_deref().unwrap_or("untitled"),
            red(&d.error.to_string())
        );
    }
    Ok(())
}

fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        "heic" => "image/heic",
        "webp" => "image/webp",
        "txt" => "text/plain",
        _ => return None,
    })
}

/// Atomic write: temp file then rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename to {}", path.display()))?;
    Ok(())
}
