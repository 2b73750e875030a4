use crate::archive::{encode, ArchiveDecoder};
use crate::config::launcher::{LaunchProfile, LauncherConfig};
use crate::config::types::{LaunchError, Platform};
use crate::kernel::signal::SignalHandler;
use crate::resources::{ArtifactImage, Blob, ResourceTable};
use crate::session::{Launcher, RepackOutcome, ShutdownTrigger};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CliMode {
    /// Run the embedded dev environment (`devcapsule`)
    Launch,
    /// Build an artifact (`devcapsule-pack`)
    Pack,
}

impl CliMode {
    fn primary_binary(self) -> &'static str {
        match self {
            Self::Launch => "devcapsule",
            Self::Pack => "devcapsule-pack",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "devcapsule", author, version, about = "Run the embedded development environment", long_about = None)]
struct LaunchArgs {
    /// Port handed to the dev server
    #[arg(long)]
    port: Option<u16>,
    /// Where to write the repacked artifact (default: <name>.updated next to this one)
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Store polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,
    /// Time the server gets to exit after SIGTERM, in milliseconds
    #[arg(long, value_name = "MS")]
    grace_period_ms: Option<u64>,
    /// Parent directory for the session workspace
    #[arg(long, value_name = "DIR")]
    workspace_root: Option<PathBuf>,
    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print the embedded resource table and exit
    #[arg(long)]
    inspect: bool,
}

#[derive(Parser, Debug)]
#[command(name = "devcapsule-pack", author, version, about = "Build a self-contained devcapsule artifact", long_about = None)]
struct PackArgs {
    /// Launcher executable the payload is appended to (default: devcapsule next to this tool)
    #[arg(long, value_name = "PATH")]
    launcher: Option<PathBuf>,
    /// Runtime binary for one platform, e.g. linux-x64=/path/to/node
    #[arg(long = "runtime", value_name = "PLATFORM=PATH", required = true)]
    runtimes: Vec<String>,
    /// Dependency directory, or a pre-built .tar.gz of one
    #[arg(long, value_name = "PATH")]
    deps: PathBuf,
    /// Dev server script
    #[arg(long, value_name = "FILE")]
    script: PathBuf,
    /// Initial project store
    #[arg(long, value_name = "FILE")]
    store: PathBuf,
    /// Restrict the platforms the artifact serves (comma separated; default: all supported)
    #[arg(long, value_delimiter = ',', value_name = "PLATFORMS")]
    claim: Vec<String>,
    /// JSON launch profile (runtime, script, store and dependency names)
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,
    /// Artifact to write
    #[arg(short, long, value_name = "PATH")]
    output: PathBuf,
}

/// `RUST_LOG` wins; otherwise progress lines at info are shown
fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Process exit code for an error that reached the CLI boundary
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<LaunchError>())
        .map(i32::from)
        .unwrap_or(1)
}

pub fn run(mode: CliMode) -> Result<()> {
    init_logging();

    let result = match mode {
        CliMode::Launch => run_launch(LaunchArgs::parse()),
        CliMode::Pack => run_pack(PackArgs::parse()),
    };

    if let Err(e) = &result {
        eprintln!("{}: {:#}", mode.primary_binary(), e);
        std::process::exit(exit_code(e));
    }
    result
}

fn launch_config(args: &LaunchArgs) -> Result<LauncherConfig> {
    let mut config = match &args.config {
        Some(path) => LauncherConfig::load(path)?,
        None => LauncherConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(ms) = args.grace_period_ms {
        config.grace_period_ms = ms;
    }
    if let Some(output) = &args.output {
        config.output = Some(output.clone());
    }
    if let Some(root) = &args.workspace_root {
        config.workspace_root = Some(root.clone());
    }
    config.validate()?;
    Ok(config)
}

fn run_launch(args: LaunchArgs) -> Result<()> {
    let config = launch_config(&args)?;
    let (image, table) = ArtifactImage::open_current()?;

    if args.inspect {
        print!("{}", describe_table(&image, &table)?);
        return Ok(());
    }

    // Installed before the child exists so a Ctrl+C during setup still
    // goes through the normal teardown.
    let signals = SignalHandler::init().context("failed to install signal handlers")?;
    let outcome = Launcher::new(image, table, config).run(&signals)?;

    match outcome.trigger {
        ShutdownTrigger::ChildExited => match outcome.child_exit {
            Some(status) => log::info!("Dev server exited ({})", status),
            None => log::warn!("Dev server exited; status unknown"),
        },
        ShutdownTrigger::Requested { .. } => log::info!("Dev server stopped"),
    }
    match &outcome.repack {
        RepackOutcome::Unchanged => log::info!("No project changes; artifact left as is"),
        RepackOutcome::Written(path) => log::info!("Updated artifact written to {}", path.display()),
        RepackOutcome::Failed {
            error,
            store_at,
            workspace_retained,
        } => {
            log::error!("Could not write updated artifact: {}", error);
            if *workspace_retained {
                log::error!("Workspace kept; edited project is at {}", store_at.display());
            } else {
                log::warn!("Edited project saved to {}", store_at.display());
            }
        }
    }
    Ok(())
}

/// Human-readable summary of an artifact's contents
pub fn describe_table(image: &ArtifactImage, table: &ResourceTable) -> Result<String> {
    use std::fmt::Write;

    let mut out = String::new();
    let claimed: Vec<String> = table
        .claimed_platforms()
        .iter()
        .map(ToString::to_string)
        .collect();
    writeln!(out, "artifact:  {}", image.path().display())?;
    writeln!(out, "launcher:  {} bytes", image.image_len())?;
    writeln!(out, "platforms: {}", claimed.join(", "))?;
    let profile = table.profile();
    writeln!(
        out,
        "profile:   runtime={} script={} store={} deps={} (${})",
        profile.runtime_name,
        profile.server_script_name,
        profile.store_file_name,
        profile.dependency_dir_name,
        profile.dependency_env_var
    )?;
    for (key, resource) in table.entries() {
        writeln!(
            out,
            "  {:<32} {:>12} bytes  {}",
            key.to_string(),
            resource.blob.len(),
            resource.sha256.as_deref().unwrap_or("-")
        )?;
    }
    Ok(out)
}

fn default_launcher() -> Result<PathBuf> {
    let tool = std::env::current_exe().context("cannot locate devcapsule-pack")?;
    let name = format!("devcapsule{}", std::env::consts::EXE_SUFFIX);
    Ok(tool.with_file_name(name))
}

fn parse_runtime(spec: &str) -> Result<(Platform, PathBuf)> {
    let (platform, path) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("--runtime expects PLATFORM=PATH, got {:?}", spec))?;
    let platform: Platform = platform.trim().parse()?;
    if !platform.is_supported() {
        anyhow::bail!("{} is not a supported platform", platform);
    }
    Ok((platform, PathBuf::from(path)))
}

/// Dependency payload from a directory (encoded here) or an existing
/// archive (checked to decode cleanly)
fn dependency_blob(path: &Path) -> Result<Blob> {
    if path.is_dir() {
        let bytes = encode(path).with_context(|| format!("encoding {}", path.display()))?;
        log::info!("Encoded {} ({} bytes compressed)", path.display(), bytes.len());
        return Ok(Blob::from_bytes(bytes));
    }

    let blob = Blob::from_path(path)?;
    let mut count = 0usize;
    {
        let mut decoder = ArchiveDecoder::new(BufReader::new(blob.reader()?));
        for entry in decoder.entries()? {
            entry.with_context(|| format!("checking {}", path.display()))?;
            count += 1;
        }
    }
    log::info!("Using pre-built archive {} ({} entries)", path.display(), count);
    Ok(blob)
}

fn run_pack(args: PackArgs) -> Result<()> {
    let launcher = match &args.launcher {
        Some(path) => path.clone(),
        None => default_launcher()?,
    };
    let profile = match &args.profile {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<LaunchProfile>(&raw)
                .map_err(|e| LaunchError::Config(format!("invalid profile {}: {}", path.display(), e)))?
        }
        None => LaunchProfile::default(),
    };

    let mut builder = ResourceTable::builder().profile(profile);
    for spec in &args.runtimes {
        let (platform, path) = parse_runtime(spec)?;
        builder = builder.runtime(platform, Blob::from_path(&path)?);
    }
    if !args.claim.is_empty() {
        let claimed = args
            .claim
            .iter()
            .map(|p| p.trim().parse::<Platform>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        builder = builder.claim(&claimed);
    }
    let table = builder
        .dependency_archive(dependency_blob(&args.deps)?)
        .server_script(Blob::from_path(&args.script)?)
        .project_store(Blob::from_path(&args.store)?)
        .build()?;

    let image = ArtifactImage::launcher(&launcher)
        .with_context(|| format!("reading launcher {}", launcher.display()))?;
    let written = image.write_file(&table, &args.output)?;
    log::info!(
        "Wrote {} ({} resources for {} platforms)",
        written.display(),
        table.len(),
        table.claimed_platforms().len()
    );
    Ok(())
}
