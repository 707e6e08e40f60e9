pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "skillflow",
    about = "Skillflow operator CLI",
    long_about = "Operate the skillflow context store, inspect configuration, and check skill definitions.",
    after_help = "Examples:\n  skillflow doctor --json\n  skillflow skill check skills/order_pizza.toml\n  skillflow context show line:U100"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity, and context store schema")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Work with skill definition files")]
    Skill(SkillCommand),
    #[command(subcommand, about = "Inspect persisted conversation contexts")]
    Context(ContextCommand),
}

#[derive(Debug, Subcommand)]
enum SkillCommand {
    #[command(about = "Load a TOML or JSON skill definition and report definition issues")]
    Check { file: PathBuf },
}

#[derive(Debug, Subcommand)]
enum ContextCommand {
    #[command(about = "Print the stored context of a session")]
    Show { session: String },
    #[command(about = "List the most recently updated sessions")]
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    logging::init_from_env();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Skill(SkillCommand::Check { file }) => commands::skill::check(&file),
        Command::Context(ContextCommand::Show { session }) => commands::context::show(&session),
        Command::Context(ContextCommand::List { limit }) => commands::context::list(limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
