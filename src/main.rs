use clap::Parser;
use miette::Result;
use mes::cli::{Cli, Commands, GlobalOpts};
use mes::core::{Config, Project};

fn main() -> Result<()> {
    // Reset SIGPIPE so piping to `head` terminates quietly instead of panicking
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;
    init_tracing(&global);

    match cli.command {
        Commands::Init(args) => mes::cli::commands::init::run(args, &global),
        Commands::Part(cmd) => mes::cli::commands::part::run(cmd, &global),
        Commands::Product(cmd) => mes::cli::commands::product::run(cmd, &global),
        Commands::Work(cmd) => mes::cli::commands::work::run(cmd, &global),
        Commands::Log(cmd) => mes::cli::commands::log::run(cmd, &global),
        Commands::Trace(cmd) => mes::cli::commands::trace::run(cmd, &global),
        Commands::Report(cmd) => mes::cli::commands::report::run(cmd, &global),
        Commands::Db(cmd) => mes::cli::commands::db::run(cmd, &global),
        Commands::Completions(args) => mes::cli::commands::completions::run(args),
    }
}

/// Log to stderr, filtered by RUST_LOG, then the configured `log_level`, then `--verbose`
fn init_tracing(global: &GlobalOpts) {
    use tracing_subscriber::EnvFilter;

    let project = match global.project {
        Some(ref root) => Project::discover_from(root).ok(),
        None => Project::discover().ok(),
    };
    let config = Config::load(project.as_ref());

    let fallback = if global.verbose { "info" } else { "warn" };
    let directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or(config.log_level)
        .unwrap_or_else(|| fallback.to_string());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
