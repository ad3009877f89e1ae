//! Moonveil CLI
//!
//! Command-line interface for obfuscating and checking Lua sources.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use moonveil_core::{
    obfuscate, validate_code, Features, ObfuscateOptions, Target, CONFIG_FILE_NAME, FEATURE_NAMES,
};

#[derive(Parser)]
#[command(name = "moonveil")]
#[command(about = "Lua source-to-source obfuscator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obfuscate a Lua file
    Obfuscate {
        /// Lua source file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target platform: roblox, loadstring or standard
        #[arg(short, long)]
        target: Option<Target>,

        /// Seed for reproducible output (default: from config, else the clock)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Options file (default: recommended features)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Turn a feature on, by camelCase name
        #[arg(long = "enable", value_name = "FEATURE")]
        enable: Vec<String>,

        /// Turn a feature off, by camelCase name
        #[arg(long = "disable", value_name = "FEATURE")]
        disable: Vec<String>,

        /// Print stats as JSON on stderr
        #[arg(long)]
        stats: bool,
    },

    /// Check a Lua file for unbalanced blocks and syntax errors
    Validate {
        /// Lua source file
        input: PathBuf,
    },

    /// Write a default moonveil.toml
    Init {
        /// File or directory to write to (default: current directory)
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("moonveil=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Obfuscate {
            input,
            output,
            target,
            seed,
            config,
            enable,
            disable,
            stats,
        } => {
            let options = build_options(config.as_deref(), target, seed, &enable, &disable)?;
            cmd_obfuscate(&input, output.as_deref(), &options, stats)?;
        }
        Commands::Validate { input } => {
            cmd_validate(&input)?;
        }
        Commands::Init { path, force } => {
            cmd_init(path, force)?;
        }
    }

    Ok(())
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Merge the options file with command-line overrides
fn build_options(
    config: Option<&Path>,
    target: Option<Target>,
    seed: Option<u64>,
    enable: &[String],
    disable: &[String],
) -> Result<ObfuscateOptions> {
    let mut options = match config {
        Some(path) => ObfuscateOptions::from_config_file(path)?,
        None => ObfuscateOptions {
            seed: clock_seed(),
            features: Features::recommended(),
            ..Default::default()
        },
    };
    if let Some(target) = target {
        options.target = target;
    }
    if let Some(seed) = seed {
        options.seed = seed;
    }
    for name in enable {
        options.features.set(name, true).map_err(|e| anyhow!(e))?;
    }
    for name in disable {
        options.features.set(name, false).map_err(|e| anyhow!(e))?;
    }
    Ok(options)
}

/// Obfuscate one file
fn cmd_obfuscate(input: &Path, output: Option<&Path>, options: &ObfuscateOptions, stats: bool) -> Result<()> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    tracing::info!("Obfuscating {} for {} (seed {})", input.display(), options.target, options.seed);
    let result = obfuscate(&source, options)
        .with_context(|| format!("Failed to obfuscate {}", input.display()))?;

    for warning in &result.stats.warnings {
        tracing::warn!("{}", warning);
    }

    match output {
        Some(path) => {
            std::fs::write(path, &result.code)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Wrote {} bytes to {}", result.code.len(), path.display());
        }
        None => println!("{}", result.code),
    }

    if stats {
        eprintln!("{}", serde_json::to_string_pretty(&result.stats)?);
    }

    Ok(())
}

/// Validate one file
fn cmd_validate(input: &Path) -> Result<()> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let validation = validate_code(&source);
    if validation.valid {
        println!("{}: ok", input.display());
        return Ok(());
    }
    for error in &validation.errors {
        println!("{}: {}", input.display(), error);
    }
    bail!("{} has {} problem(s)", input.display(), validation.errors.len())
}

/// Resolve where `init` writes
fn init_target(path: Option<PathBuf>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    if path.is_dir() {
        Ok(path.join(CONFIG_FILE_NAME))
    } else {
        Ok(path)
    }
}

/// Write a default options file
fn cmd_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = init_target(path)?;
    if config_path.exists() && !force {
        bail!("{} already exists (use --force to replace it)", config_path.display());
    }

    let options = ObfuscateOptions::new(Target::Standard, clock_seed(), Features::recommended());
    options.save(&config_path)?;

    println!("Wrote {}", config_path.display());
    println!("\nFeatures: {}", FEATURE_NAMES.join(", "));
    println!("\nNext steps:");
    println!("  moonveil obfuscate main.lua --config {} -o main.obf.lua", config_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        ObfuscateOptions::new(Target::Roblox, 5, Features::default())
            .save(&path)
            .unwrap();

        let options = build_options(
            Some(&path),
            Some(Target::Loadstring),
            None,
            &["minify".to_string(), "junkCode".to_string()],
            &["junkCode".to_string()],
        )
        .unwrap();
        assert_eq!(options.target, Target::Loadstring);
        assert_eq!(options.seed, 5);
        assert!(options.features.minify);
        assert!(!options.features.junk_code);
    }

    #[test]
    fn test_unknown_feature_rejected() {
        let err = build_options(None, None, Some(1), &["warp".to_string()], &[]).unwrap_err();
        assert!(err.to_string().contains("unknown feature 'warp'"));
    }

    #[test]
    fn test_init_writes_into_directory_once() {
        let dir = TempDir::new().unwrap();
        cmd_init(Some(dir.path().to_path_buf()), false).unwrap();
        let written = dir.path().join(CONFIG_FILE_NAME);
        let options = ObfuscateOptions::from_config_file(&written).unwrap();
        assert_eq!(options.features, Features::recommended());
        assert!(cmd_init(Some(dir.path().to_path_buf()), false).is_err());
        assert!(cmd_init(Some(dir.path().to_path_buf()), true).is_ok());
    }
}
