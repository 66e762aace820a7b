//! gitlab-oauth CLI binary entry point.

use gitlab_oauth::cli::{auth, format_error_help, Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();
    let result = match auth::build_session(&cli) {
        Ok(session) => match cli.command {
            Commands::Login => auth::handle_login(&session).await,
            Commands::Status => auth::handle_status(&session).await,
            Commands::Whoami => auth::handle_whoami(&session).await,
            Commands::Logout => auth::handle_logout(&session).await,
        },
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        eprintln!("Error: {}", format_error_help(&err));
        std::process::exit(1);
    }
}
