//! `mes init` command - create a project and its database

use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

use crate::cli::GlobalOpts;
use crate::core::project::{Project, ProjectError};
use crate::core::{Config, Store};

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Re-initialize even if .mes/ already exists (existing data is kept)
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, global: &GlobalOpts) -> Result<()> {
    let path = if args.path.as_os_str() == "." {
        std::env::current_dir().into_diagnostic()?
    } else {
        args.path.clone()
    };

    if !path.exists() {
        std::fs::create_dir_all(&path).into_diagnostic()?;
    }

    let project = if args.force {
        Project::init_force(&path)
    } else {
        Project::init(&path)
    };

    let project = match project {
        Ok(project) => project,
        Err(ProjectError::AlreadyExists(path)) => {
            println!(
                "{} MES project already exists at {}",
                style("!").yellow(),
                style(path.display()).cyan()
            );
            println!("Use {} to reinitialize.", style("--force").yellow());
            return Ok(());
        }
        Err(e) => return Err(miette::miette!("{}", e)),
    };

    let db_path = project.database_path_with(&Config::load(Some(&project)));
    Store::open_path(&db_path)?;

    if global.quiet {
        return Ok(());
    }

    println!(
        "{} Initialized MES project at {}",
        style("✓").green(),
        style(project.root().display()).cyan()
    );
    println!("  database: {}", style(db_path.display()).dim());
    println!();
    println!("Next steps:");
    println!(
        "  {} Import a work instruction",
        style("mes work import <file.yaml>").yellow()
    );
    println!(
        "  {} Register the product it builds",
        style("mes product new <part-number>").yellow()
    );
    println!(
        "  {} Print a log template to fill in",
        style("mes log template --work WI-1 --product PRD-1").yellow()
    );
    Ok(())
}
