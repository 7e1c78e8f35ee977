//! Command line for the noce updater.

use anyhow::{Context, Result};
use clap::Parser;
use noce_core::cleanup::TerminationSignals;
use noce_core::config::{self, NoceConfig};
use noce_core::logging;
use noce_core::reactor::LogReactor;
use noce_core::remote::{Address, LocalMount, Mount};
use noce_core::service;
use noce_core::verify::Verifier;
use std::path::PathBuf;

/// Keeps a local copy of a signed artifact in sync with a remote file tree.
#[derive(Debug, Parser)]
#[command(name = "noce")]
#[command(about = "noce: signed artifact updater and remote tree watcher", long_about = None)]
pub struct Cli {
    /// Remote address (`host:port`, or `dir:<path>` to serve a local directory).
    #[arg(long = "addr", value_name = "ADDR")]
    pub addr: Option<String>,

    /// Debug verbosity: 0 = info, 1 = noce debug, 2 = debug, 3+ = trace.
    #[arg(short = 'd', value_name = "LEVEL")]
    pub debug: Option<u8>,

    /// Config file to read instead of the default one.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Load the config file and apply flag overrides on top.
    pub fn resolve_config(&self) -> Result<NoceConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_from(path)?,
            None => config::load_or_init()?,
        };
        self.apply_overrides(&mut cfg);
        Ok(cfg)
    }

    fn apply_overrides(&self, cfg: &mut NoceConfig) {
        if let Some(addr) = &self.addr {
            cfg.address = addr.clone();
        }
        if let Some(level) = self.debug {
            cfg.debug_level = level;
        }
    }
}

/// Parse the command line, run the service and return the exit status.
pub async fn run_from_args() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = cli.resolve_config()?;

    if let Err(e) = logging::init_logging(cfg.debug_level) {
        logging::init_logging_stderr(cfg.debug_level);
        tracing::warn!("log file unavailable, logging to stderr: {:#}", e);
    }

    let address = Address::parse(&cfg.address);
    check_transport(&address)?;

    // Handlers go in before any worker starts so no signal is missed.
    let signals = TerminationSignals::install().context("install signal handlers")?;
    let verifier = Verifier::load(&cfg.trust_anchor)
        .with_context(|| format!("load trust anchor {}", cfg.trust_anchor.display()))?;

    match address {
        Address::Dir(root) => serve(&cfg, LocalMount::new(root), verifier, signals).await,
        Address::Tcp(addr) => remote(&cfg, addr, verifier, signals).await,
    }
}

#[cfg(feature = "ninep")]
async fn remote(
    cfg: &NoceConfig,
    addr: String,
    verifier: Verifier,
    signals: TerminationSignals,
) -> Result<i32> {
    let mount = noce_core::remote::NinepMount::new(addr);
    serve(cfg, mount, verifier, signals).await
}

#[cfg(not(feature = "ninep"))]
async fn remote(
    _cfg: &NoceConfig,
    addr: String,
    _verifier: Verifier,
    _signals: TerminationSignals,
) -> Result<i32> {
    anyhow::bail!("no 9P transport for {}", addr)
}

/// Refuse addresses this build has no transport for, before anything starts.
fn check_transport(address: &Address) -> Result<()> {
    match address {
        Address::Tcp(addr) if !cfg!(feature = "ninep") => anyhow::bail!(
            "address {} needs 9P support (build with --features ninep), or use dir:<path>",
            addr
        ),
        _ => Ok(()),
    }
}

async fn serve<M: Mount>(
    cfg: &NoceConfig,
    mount: M,
    verifier: Verifier,
    signals: TerminationSignals,
) -> Result<i32> {
    let (code, workers) = service::run(cfg, mount, verifier, LogReactor, signals.recv())
        .await
        .context("start workers")?;
    let panicked = workers.join_finished();
    if panicked > 0 {
        tracing::error!(panicked, "worker threads panicked");
    }
    Ok(code)
}
