use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use framegen_core::{CompilerConfig, FrameCompiler, RawRequest};
use framegen_rules::RuleSet;
use framegen_status::RequestState;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "framegen", about = "Compile telemetry frame requests into configuration documents")]
struct Cli {
    /// Directory with the catalog databases [env: FRAMEGEN_CATALOG_DIR]
    #[arg(long, global = true)]
    catalog_dir: Option<PathBuf>,
    /// Status database file [env: FRAMEGEN_STATUS_DB]
    #[arg(long, global = true)]
    status_db: Option<PathBuf>,
    /// Rule table (YAML) [env: FRAMEGEN_RULES]
    #[arg(long, global = true)]
    rules: Option<PathBuf>,
    /// Frame library (YAML) [env: FRAMEGEN_FRAME_LIBRARY]
    #[arg(long, global = true)]
    frame_library: Option<PathBuf>,
    /// Packing service URL [env: FRAMEGEN_PACKER_URL]
    #[arg(long, global = true)]
    packer_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a request file (`-` reads stdin) and print the response.
    Build {
        #[arg(default_value = "-")]
        request: String,
        /// Write the document here instead of embedding it in the response.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the stored state of a request.
    Status { uid: String },
    /// Forget a request so its UID can be submitted again.
    Clear { uid: String },
    /// Print the active rule table as YAML.
    Rules,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FRAMEGEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("tracing already initialized: {error}");
    }
}

fn read_request(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body)?;
        Ok(body)
    } else {
        Ok(std::fs::read_to_string(source)?)
    }
}

impl Cli {
    fn config(&self) -> CompilerConfig {
        let mut config = CompilerConfig::from_env();
        if let Some(dir) = &self.catalog_dir {
            config.catalog_dir = dir.clone();
        }
        if let Some(db) = &self.status_db {
            config.status_db = db.clone();
        }
        if let Some(rules) = &self.rules {
            config.rules = Some(rules.clone());
        }
        if let Some(library) = &self.frame_library {
            config.frame_library = Some(library.clone());
        }
        if let Some(url) = &self.packer_url {
            config.packer_url = Some(url.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let compiler = FrameCompiler::from_config(&cli.config())?;

    match cli.command {
        Command::Build { request, out } => {
            let mut raw: RawRequest = serde_json::from_str(&read_request(&request)?)?;
            if raw.uid().is_none() {
                let uid = uuid::Uuid::new_v4().to_string();
                tracing::info!(%uid, "request has no uid, generated one");
                raw.uid = Some(uid);
            }
            let mut response = compiler.handle(&raw).await;
            if let Some(path) = &out {
                if let Some(document) = response.document.take() {
                    std::fs::write(path, document)?;
                    eprintln!("document written to {}", path.display());
                }
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.status_code >= 400 {
                std::process::exit(1);
            }
        }
        Command::Status { uid } => match compiler.store.get(&uid)? {
            None => println!("{uid}: absent"),
            Some(record) => match record.state() {
                RequestState::Pending => println!("{uid}: pending"),
                RequestState::Success { status, .. } => println!("{uid}: built ({status})"),
                RequestState::Failed { message } => println!("{uid}: failed: {message}"),
            },
        },
        Command::Clear { uid } => {
            compiler.store.clear(&uid)?;
            println!("{uid}: cleared");
        }
        Command::Rules => {
            let table = RuleSet {
                rules: compiler.rules().rules().to_vec(),
            };
            print!("{}", serde_yaml::to_string(&table)?);
        }
    }

    Ok(())
}
