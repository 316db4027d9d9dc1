mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{CmdError, Context};
use ocirootfs_core::LoaderConfig;
use ocirootfs_store::ImageLayout;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ocirootfs",
    version,
    about = "Browse and verify the root filesystem of an OCI image layout"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args)]
struct GlobalArgs {
    /// Path to the OCI image layout directory.
    #[arg(long, default_value = ".", global = true)]
    layout: PathBuf,

    /// Image reference (org.opencontainers.image.ref.name); may be omitted
    /// when the layout holds a single image.
    #[arg(long = "ref", global = true)]
    reference: Option<String>,

    /// Target platform as os[/arch[/variant]], or "host".
    #[arg(long, global = true)]
    platform: Option<String>,

    /// Directory for decompressed layers (default: a temporary directory).
    #[arg(long, global = true)]
    scratch: Option<PathBuf>,

    /// Config file (default: $OCIROOTFS_CONFIG or ~/.config/ocirootfs/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the images named in index.json.
    Refs,
    /// Show the resolved manifest and its layers.
    Inspect,
    /// List a directory of the image root filesystem.
    Ls {
        #[arg(default_value = "/")]
        path: PathBuf,
        /// List subdirectories recursively.
        #[arg(short = 'R', long, default_value_t = false)]
        recursive: bool,
    },
    /// Write a file from the image root filesystem to stdout.
    Cat { path: PathBuf },
    /// Show metadata of a path in the image root filesystem.
    Stat { path: PathBuf },
    /// Check the digests of the resolved manifest, its config and its layers.
    Verify,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.global.trace {
        "trace"
    } else if cli.global.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("OCIROOTFS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let result = run(cli);

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {}", e.message);
            ExitCode::from(e.code)
        }
    }
}

fn run(cli: Cli) -> Result<u8, CmdError> {
    let global = &cli.global;
    match cli.command {
        Commands::Refs => commands::refs::run(&context(global)?),
        Commands::Inspect => commands::inspect::run(&context(global)?),
        Commands::Ls { path, recursive } => commands::ls::run(&context(global)?, &path, recursive),
        Commands::Cat { path } => commands::cat::run(&context(global)?, &path),
        Commands::Stat { path } => commands::stat::run(&context(global)?, &path),
        Commands::Verify => commands::verify::run(&context(global)?),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    }
}

/// Merge command-line flags over the config file.
fn context(args: &GlobalArgs) -> Result<Context, CmdError> {
    let file_config = match &args.config {
        Some(path) => LoaderConfig::load(path)?,
        None => LoaderConfig::load_default()?,
    };
    let config = LoaderConfig {
        scratch_dir: args.scratch.clone(),
        platform: args.platform.clone(),
        reference: args.reference.clone(),
    }
    .or(file_config);

    Ok(Context {
        layout: ImageLayout::new(&args.layout),
        reference: config.reference.clone().unwrap_or_default(),
        platform: config.platform()?,
        scratch: config.scratch_dir,
        json: args.json,
    })
}
