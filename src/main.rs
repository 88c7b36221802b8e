mod db;
mod error;
mod models;
mod scoring;
mod server;
mod session;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use db::Database;
use models::NewQuestion;
use server::AppState;

const DEFAULT_DB_NAME: &str = "certdrill.db";

#[derive(Parser)]
#[command(name = "certdrill")]
#[command(about = "Multiple-choice exam drilling with per-question mastery tracking")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Import questions from a JSON file
    Import {
        /// Path to a JSON array of questions
        file: PathBuf,
    },

    /// Show mastery statistics
    Stats,

    /// Reset all answer counters and mastery flags
    ClearProgress,

    /// Run the quiz web service
    Serve {
        /// Port to listen on (falls back to PORT, then 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },
}

fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("CERTDRILL_DB") {
        return PathBuf::from(path);
    }

    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("certdrill");

    std::fs::create_dir_all(&config_dir).ok();
    config_dir.join(DEFAULT_DB_NAME)
}

fn default_port() -> Option<u16> {
    std::env::var("PORT").ok()?.parse().ok()
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let db_path = get_db_path();
    let mut db = Database::open(&db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at: {}", db_path.display());
        }

        Commands::Import { file } => {
            db.init()?;
            let raw = std::fs::read_to_string(&file)?;
            let questions: Vec<NewQuestion> = serde_json::from_str(&raw)?;
            let imported = db.import(&questions)?;
            println!("Imported {} questions from {}", imported, file.display());
        }

        Commands::Stats => {
            let stats = db.stats()?;
            println!("=== Question Statistics ===");
            println!("Total questions: {}", stats.total);
            println!("Mastered: {}", stats.mastered);
            println!("Needs practice: {}", stats.needs_practice);
            println!("Missed: {}", stats.missed);
            if !stats.domains.is_empty() {
                println!();
                println!("{:<30} QUESTIONS", "DOMAIN");
                println!("{}", "-".repeat(45));
                for dc in &stats.domains {
                    println!("{:<30} {}", dc.domain.as_str(), dc.count);
                }
            }
        }

        Commands::ClearProgress => {
            let cleared = db.clear_progress()?;
            println!("Cleared progress on {} questions.", cleared);
        }

        Commands::Serve { port } => {
            let port = port.or_else(default_port).unwrap_or(8080);
            db.init()?;
            serve(db, port)?;
        }
    }

    Ok(())
}

fn serve(db: Database, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(db));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr).await?;
        log::info!("listening on http://{addr}");

        tokio::select! {
            result = server::serve(listener, state) => result?,
            _ = tokio::signal::ctrl_c() => log::info!("received interrupt, shutting down"),
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    mod cli_tests {
        use super::*;

        #[test]
        fn parse_init_command() {
            let cli = Cli::try_parse_from(["certdrill", "init"]).unwrap();
            assert!(matches!(cli.command, Commands::Init));
        }

        #[test]
        fn parse_import_requires_file() {
            let result = Cli::try_parse_from(["certdrill", "import"]);
            assert!(result.is_err());

            let cli = Cli::try_parse_from(["certdrill", "import", "questions.json"]).unwrap();
            match cli.command {
                Commands::Import { file } => {
                    assert_eq!(file, PathBuf::from("questions.json"));
                }
                _ => panic!("expected import command"),
            }
        }

        #[test]
        fn parse_serve_port() {
            let cli = Cli::try_parse_from(["certdrill", "serve"]).unwrap();
            match cli.command {
                Commands::Serve { port } => assert_eq!(port, None),
                _ => panic!("expected serve command"),
            }

            let cli = Cli::try_parse_from(["certdrill", "serve", "--port", "3000"]).unwrap();
            match cli.command {
                Commands::Serve { port } => assert_eq!(port, Some(3000)),
                _ => panic!("expected serve command"),
            }
        }

        #[test]
        fn parse_invalid_command_fails() {
            let result = Cli::try_parse_from(["certdrill", "invalid"]);
            assert!(result.is_err());
        }
    }

    mod db_path_tests {
        use super::*;
        use std::env;

        #[test]
        fn get_db_path_uses_env_var() {
            let test_path = "/tmp/test_certdrill.db";
            env::set_var("CERTDRILL_DB", test_path);

            let path = get_db_path();
            assert_eq!(path.to_str().unwrap(), test_path);

            env::remove_var("CERTDRILL_DB");
        }
    }
}
