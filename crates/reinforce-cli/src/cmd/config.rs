use crate::output::print_json;
use crate::session::Paths;
use anyhow::{bail, Context};
use clap::Subcommand;
use reinforce_core::SyncConfig;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Check the configuration for values that break syncing
    Validate,

    /// Write the default configuration to --config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(paths: &Paths, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(paths, json),
        ConfigSubcommand::Validate => validate(paths, json),
        ConfigSubcommand::Init { force } => init(paths, force),
    }
}

fn show(paths: &Paths, json: bool) -> anyhow::Result<()> {
    let config = paths.load_config()?;
    if json {
        print_json(&config)
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
        Ok(())
    }
}

fn validate(paths: &Paths, json: bool) -> anyhow::Result<()> {
    let config = paths.load_config()?;
    let warnings = config.validate();

    if json {
        return print_json(&warnings);
    }
    if warnings.is_empty() {
        println!("Config OK.");
    } else {
        for w in &warnings {
            println!("warning: {}: {}", w.field, w.message);
        }
    }
    Ok(())
}

fn init(paths: &Paths, force: bool) -> anyhow::Result<()> {
    let Some(path) = &paths.config else {
        bail!("config init needs --config <path>");
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    SyncConfig::default()
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}.", path.display());
    Ok(())
}
