use crate::{
    dedup_targets, format_duration, reconcile, AssumeYes, BatchScheduler, ChromeCapturer,
    Config, Confirmer, EgressMode, EgressProvider, EgressRotator, ErrorSinks, Metrics,
    NordVpnProvider, OpenVpnProvider, OutputFormat, PassContext, PassOutcome, ReportGenerator,
    RetryCoordinator, RotatorError, Session, SessionStore, TerminalConfirmer,
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "screenshot-rotator")]
#[command(about = "Bulk website screenshot tool with rotating egress identities")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[arg(
        short = 't',
        long,
        help = "File with targets, one per line (stdin when omitted or '-')"
    )]
    pub targets: Option<PathBuf>,

    #[arg(short = 'o', long, help = "Directory for capture artifacts")]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = EgressArg::None, help = "Egress rotation mode")]
    pub egress: EgressArg,

    #[arg(long, help = "Directory with .ovpn profiles (openvpn mode only)")]
    pub ovpn_dir: Option<PathBuf>,

    #[arg(
        short = 'n',
        long,
        help = "Targets per batch before the egress identity rotates"
    )]
    pub batch_size: Option<usize>,

    #[arg(short = 'w', long, help = "Capture worker pool size (default: CPU count)")]
    pub workers: Option<usize>,

    #[arg(long, default_value_t = 30, help = "Per-capture timeout in seconds")]
    pub timeout: u64,

    #[arg(
        long,
        default_value_t = 0,
        help = "Extra delay in seconds before each rotation"
    )]
    pub rotation_delay: u64,

    #[arg(long, value_enum, default_value_t = FormatArg::Png, help = "Artifact image format")]
    pub format: FormatArg,

    #[arg(long, help = "Collect page metadata and export metadata.csv")]
    pub csv: bool,

    #[arg(long, help = "Answer 'y' to every prompt (non-interactive)")]
    pub yes: bool,

    #[arg(long, help = "Chrome/Chromium executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EgressArg {
    None,
    Nordvpn,
    Openvpn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Png,
    Jpeg,
    Webp,
}

/// Turn CLI arguments into a validated [`Config`].
///
/// Flag-combination rules are enforced here, before any session or browser
/// is touched: a rotation threshold without an egress mode is as much an
/// operator error as an egress mode without a threshold.
pub fn build_config(args: &Cli) -> Result<Config, RotatorError> {
    let egress = match args.egress {
        EgressArg::None => {
            if args.batch_size.is_some() {
                return Err(RotatorError::Setup(
                    "--batch-size requires an egress mode (--egress nordvpn|openvpn)".to_string(),
                ));
            }
            EgressMode::None
        }
        EgressArg::Nordvpn => EgressMode::NordVpn,
        EgressArg::Openvpn => {
            let dir = args.ovpn_dir.clone().ok_or_else(|| {
                RotatorError::Setup("--egress openvpn requires --ovpn-dir".to_string())
            })?;
            if !dir.is_dir() {
                return Err(RotatorError::Setup(format!(
                    "folder '{}' does not exist",
                    dir.display()
                )));
            }
            let profiles = OpenVpnProvider::list_profiles(&dir)
                .map_err(|e| RotatorError::Setup(e.to_string()))?;
            if profiles.is_empty() {
                return Err(RotatorError::Setup(format!(
                    "no .ovpn files found in '{}'",
                    dir.display()
                )));
            }
            EgressMode::OpenVpn { config_dir: dir }
        }
    };

    if egress.is_active() && !matches!(args.batch_size, Some(n) if n > 0) {
        return Err(RotatorError::Setup(
            "--batch-size must be greater than 0 when an egress mode is active".to_string(),
        ));
    }

    if args.timeout == 0 {
        return Err(RotatorError::Setup(
            "--timeout must be greater than 0".to_string(),
        ));
    }

    if args.workers == Some(0) {
        return Err(RotatorError::Setup(
            "--workers must be greater than 0".to_string(),
        ));
    }

    Ok(Config {
        workers: args.workers.unwrap_or_else(num_cpus::get),
        capture_timeout: Duration::from_secs(args.timeout),
        batch_size: args.batch_size,
        egress,
        rotation_delay: Duration::from_secs(args.rotation_delay),
        output_format: match args.format {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Webp => OutputFormat::Webp,
        },
        collect_metadata: args.csv,
        chrome_path: args.chrome_path.clone(),
        ..Default::default()
    })
}

/// Owns the wired-up components for one invocation and drives the whole
/// run: ingest, resume, initial pass, retry flow, report trigger.
pub struct Runner {
    ctx: Arc<PassContext>,
    capturer: Arc<ChromeCapturer>,
    confirmer: Arc<dyn Confirmer>,
    output_dir: PathBuf,
    targets_source: PathBuf,
    targets: Vec<String>,
}

impl Runner {
    pub async fn new(
        config: Config,
        args: &Cli,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self, RotatorError> {
        let (targets_source, targets) = read_targets(&args.targets).await?;
        if targets.is_empty() {
            return Err(RotatorError::Setup("no targets to process".to_string()));
        }

        tokio::fs::create_dir_all(&args.output).await.map_err(|e| {
            RotatorError::Setup(format!(
                "unable to create folder '{}': {e}",
                args.output.display()
            ))
        })?;

        let sinks = Arc::new(
            ErrorSinks::open(&args.output)
                .map_err(|e| RotatorError::Setup(format!("unable to open error logs: {e}")))?,
        );
        let metrics = Arc::new(Metrics::new());

        let capturer = Arc::new(
            ChromeCapturer::new(config.clone(), args.output.clone(), sinks.clone())
                .await
                .map_err(|e| RotatorError::Setup(format!("capture engine unavailable: {e}")))?,
        );

        let provider: Option<Arc<dyn EgressProvider>> = match &config.egress {
            EgressMode::None => None,
            EgressMode::NordVpn => Some(Arc::new(NordVpnProvider)),
            EgressMode::OpenVpn { config_dir } => {
                Some(Arc::new(OpenVpnProvider::new(config_dir.clone())))
            }
        };
        let rotator = provider.map(|p| {
            Arc::new(EgressRotator::new(
                p,
                config.rotation_delay,
                metrics.clone(),
                sinks.clone(),
            ))
        });

        let confirmer: Arc<dyn Confirmer> = if args.yes {
            Arc::new(AssumeYes)
        } else {
            Arc::new(TerminalConfirmer)
        };

        let ctx = Arc::new(PassContext {
            config,
            capturer: capturer.clone(),
            rotator,
            store: Arc::new(SessionStore::new(SessionStore::DEFAULT_DIR)),
            metrics,
            sinks,
            shutdown,
        });

        Ok(Self {
            ctx,
            capturer,
            confirmer,
            output_dir: args.output.clone(),
            targets_source,
            targets,
        })
    }

    pub async fn run(&self) -> Result<PassOutcome, RotatorError> {
        let started = Instant::now();
        let session_key = SessionStore::session_key(&self.targets_source, &self.output_dir);
        let targets = dedup_targets(self.targets.clone());

        let mut session = match self.ctx.store.load(&session_key) {
            Some(mut existing) => {
                info!(
                    "Session found: {}/{} targets already processed, {} screenshots done.",
                    existing.processed_domains.len(),
                    targets.len(),
                    existing.screenshots_done
                );
                if self.confirmer.confirm("Continue the previous session?") {
                    reconcile(
                        &mut existing,
                        &targets,
                        &self.output_dir,
                        &self.ctx.config.output_format,
                        self.ctx.config.min_artifact_bytes,
                    );
                    existing.remaining_domains = targets
                        .iter()
                        .filter(|t| {
                            !existing.processed_domains.contains(*t)
                                && !existing.failed_domains.contains(t.as_str())
                        })
                        .cloned()
                        .collect();
                    existing
                } else {
                    self.ctx.store.delete(&session_key);
                    self.ctx.store.delete(&SessionStore::retry_key(&session_key));
                    Session::new(targets.clone())
                }
            }
            None => {
                info!("No session found. Starting a new session.");
                Session::new(targets.clone())
            }
        };

        let scheduler = BatchScheduler::new(self.ctx.clone(), session_key.clone(), false);
        match scheduler.run(&mut session).await {
            Ok(PassOutcome::Completed) => {}
            Ok(PassOutcome::Cancelled) => {
                self.capturer.shutdown().await;
                return Ok(PassOutcome::Cancelled);
            }
            Err(e) => {
                self.capturer.shutdown().await;
                return Err(e);
            }
        }

        if session.failed_domains.is_empty() {
            info!("No targets failed, everything is fine.");
        } else {
            info!("{} target(s) failed.", session.failed_domains.len());
            if self.confirmer.confirm("Retry the failed targets?") {
                let coordinator = RetryCoordinator::new(
                    self.ctx.clone(),
                    session_key.clone(),
                    self.confirmer.clone(),
                );
                match coordinator.run(&mut session).await {
                    Ok(PassOutcome::Completed) => {}
                    Ok(PassOutcome::Cancelled) => {
                        self.capturer.shutdown().await;
                        return Ok(PassOutcome::Cancelled);
                    }
                    Err(e) => {
                        self.capturer.shutdown().await;
                        return Err(e);
                    }
                }
            } else {
                info!("Skipping retry.");
            }
        }

        // A fully completed run with nothing left to do releases its key.
        if session.remaining_domains.is_empty() && session.failed_domains.is_empty() {
            self.ctx.store.delete(&session_key);
        }

        self.trigger_report(&session);
        self.capturer.shutdown().await;

        info!(
            "Run finished in {}: {} processed, {} screenshots, {} failed.",
            format_duration(started.elapsed()),
            session.processed_domains.len(),
            session.screenshots_done,
            session.failed_domains.len()
        );
        Ok(PassOutcome::Completed)
    }

    fn trigger_report(&self, session: &Session) {
        if session.screenshots_done == 0 {
            return;
        }

        let generator = ReportGenerator::new(&self.output_dir);
        match generator.render_html(session, &self.ctx.config.output_format) {
            Ok(path) => info!("Report generated at {}", path.display()),
            Err(e) => {
                warn!("Report generation failed: {e}");
                self.ctx
                    .sinks
                    .ops_error(&format!("Report generation failed: {e}"));
            }
        }

        if self.ctx.config.collect_metadata {
            match generator.write_csv(session) {
                Ok(path) => info!("Metadata exported to {}", path.display()),
                Err(e) => {
                    warn!("Metadata export failed: {e}");
                    self.ctx
                        .sinks
                        .ops_error(&format!("Metadata export failed: {e}"));
                }
            }
        }
    }
}

async fn read_targets(path: &Option<PathBuf>) -> Result<(PathBuf, Vec<String>), RotatorError> {
    match path {
        Some(p) if p.as_os_str() != "-" => {
            let content = tokio::fs::read_to_string(p).await.map_err(|e| {
                RotatorError::Setup(format!("targets file '{}': {e}", p.display()))
            })?;
            Ok((p.clone(), parse_target_lines(&content)))
        }
        _ => {
            let mut content = String::new();
            tokio::io::stdin()
                .read_to_string(&mut content)
                .await
                .map_err(|e| RotatorError::Setup(format!("reading targets from stdin: {e}")))?;
            Ok((PathBuf::from("stdin"), parse_target_lines(&content)))
        }
    }
}

fn parse_target_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(args.iter().copied())
    }

    #[test]
    fn test_batch_size_without_egress_is_rejected() {
        let args = parse(&["screenshot-rotator", "-o", "shots", "-n", "20"]);
        let err = build_config(&args).unwrap_err();
        assert!(matches!(err, RotatorError::Setup(_)));
    }

    #[test]
    fn test_egress_requires_positive_batch_size() {
        let args = parse(&["screenshot-rotator", "-o", "shots", "--egress", "nordvpn"]);
        assert!(build_config(&args).is_err());

        let args = parse(&[
            "screenshot-rotator",
            "-o",
            "shots",
            "--egress",
            "nordvpn",
            "-n",
            "0",
        ]);
        assert!(build_config(&args).is_err());

        let args = parse(&[
            "screenshot-rotator",
            "-o",
            "shots",
            "--egress",
            "nordvpn",
            "-n",
            "25",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.batch_size, Some(25));
        assert_eq!(config.egress, EgressMode::NordVpn);
    }

    #[test]
    fn test_openvpn_requires_profile_dir() {
        let args = parse(&[
            "screenshot-rotator",
            "-o",
            "shots",
            "--egress",
            "openvpn",
            "-n",
            "10",
        ]);
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["screenshot-rotator", "-o", "shots"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.egress, EgressMode::None);
        assert_eq!(config.batch_size, None);
        assert_eq!(config.capture_timeout, Duration::from_secs(30));
        assert!(!config.collect_metadata);
    }

    #[test]
    fn test_parse_target_lines_skips_comments_and_blanks() {
        let lines = parse_target_lines("a.com\n\n# comment\n  b.com  \n");
        assert_eq!(lines, vec!["a.com", "b.com"]);
    }
}
