mod case;
mod cli;
mod config;
mod judge;
mod outcome;
mod paths;
mod report;
mod results;
mod run;
mod workspace;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use harness::io::repo_root::find_repo_root;
use harness::io::settings::EvalSettings;

use crate::paths::EvalPaths;

#[derive(Parser)]
#[command(name = "eval", version, about = "Evaluation harness for CI config generation skills")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List case ids.
    List,
    /// Run cases against the agent.
    Run {
        #[arg(required = true)]
        cases: Vec<String>,
        #[arg(long, default_value_t = 1)]
        runs: u32,
        /// Record the usage of each run as the new baseline.
        #[arg(long)]
        update_baselines: bool,
    },
    /// Evaluate a case's config checks against an existing directory.
    Check {
        case_id: String,
        workdir: PathBuf,
        /// Also run the external validator.
        #[arg(long)]
        validate: bool,
    },
    /// Print tools, skills and usage from a saved trace.
    Inspect {
        trace: PathBuf,
        #[arg(long, default_value = "")]
        prompt: String,
    },
    Report {
        case_id: String,
    },
    Clean {
        case_id: String,
    },
}

fn main() -> Result<()> {
    harness::logging::init()?;
    let cli = Cli::parse();

    let repo = || -> Result<(EvalSettings, EvalPaths)> {
        let settings = EvalSettings::from_env()?;
        let paths = EvalPaths::new(find_repo_root(&settings)?);
        Ok((settings, paths))
    };

    match cli.command {
        Command::List => {
            let (_, paths) = repo()?;
            cli::list_cases(&paths)
        }
        Command::Run {
            cases,
            runs,
            update_baselines,
        } => {
            let (mut settings, paths) = repo()?;
            settings.record_baselines |= update_baselines;
            cli::run_cases_by_id(&paths, &settings, &cases, runs)
        }
        Command::Check {
            case_id,
            workdir,
            validate,
        } => {
            let (settings, paths) = repo()?;
            cli::check_case(&paths, &settings, &case_id, &workdir, validate)
        }
        Command::Inspect { trace, prompt } => cli::inspect_trace(&trace, &prompt),
        Command::Report { case_id } => {
            let (_, paths) = repo()?;
            cli::report_case(&paths, &case_id)
        }
        Command::Clean { case_id } => {
            let (_, paths) = repo()?;
            cli::clean_case(&paths, &case_id)
        }
    }
}
