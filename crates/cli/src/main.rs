use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use lib::bootstrap;
use lib::completion::Outcome;
use lib::conversation::{Message, Role};
use lib::events::SurfaceEvent;
use lib::files::FileCatalog;
use lib::mode::Mode;
use lib::registry::ClientRegistry;
use lib::storage::{JsonFileStore, KvStore};
use lib::surface::{Sent, Surface, SurfaceKind};

#[derive(Parser)]
#[command(name = "pgpt")]
#[command(about = "PrivateGPT playground CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Check a PrivateGPT instance and remember its address.
    Connect {
        /// Config file path (default: PGPT_CONFIG_PATH or ~/.pgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Base URL (default: PGPT_URL, config, or the remembered address)
        url: Option<String>,
    },

    /// Multi-turn chat; the conversation is kept between runs.
    Chat {
        /// Config file path (default: PGPT_CONFIG_PATH or ~/.pgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Base URL (default: PGPT_URL, config, or the remembered address)
        #[arg(long, short)]
        url: Option<String>,
    },

    /// Single prompt/response exchanges without history.
    Prompt {
        /// Config file path (default: PGPT_CONFIG_PATH or ~/.pgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Base URL (default: PGPT_URL, config, or the remembered address)
        #[arg(long, short)]
        url: Option<String>,
    },

    /// List, upload, or delete ingested files.
    Files {
        /// Config file path (default: PGPT_CONFIG_PATH or ~/.pgpt/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Base URL (default: PGPT_URL, config, or the remembered address)
        #[arg(long, short)]
        url: Option<String>,

        #[command(subcommand)]
        action: FilesAction,
    },
}

#[derive(Subcommand)]
enum FilesAction {
    /// List ingested files
    List,
    /// Upload and ingest a local file
    Add { path: PathBuf },
    /// Delete every document ingested for a file name
    Delete { name: String },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("pgpt {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Connect { config, url }) => {
            if let Err(e) = run_connect(config, url).await {
                log::error!("connect failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, url }) => {
            if let Err(e) = run_surface(SurfaceKind::Chat, config, url).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Prompt { config, url }) => {
            if let Err(e) = run_surface(SurfaceKind::Prompt, config, url).await {
                log::error!("prompt failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Files {
            config,
            url,
            action,
        }) => {
            if let Err(e) = run_files(config, url, action).await {
                log::error!("files failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

/// Registry bound to a healthy backend, plus the state store.
struct App {
    registry: Arc<ClientRegistry>,
    kv: Arc<dyn KvStore>,
}

async fn open_app(config_path: Option<PathBuf>, url: Option<String>) -> anyhow::Result<App> {
    let (config, path) = lib::config::load_config(config_path)?;
    let state_path = lib::config::resolve_state_path(&config, &path);
    log::debug!("state file: {}", state_path.display());
    let kv: Arc<dyn KvStore> = Arc::new(JsonFileStore::open(&state_path).await);
    let registry = Arc::new(ClientRegistry::new());
    let address = url.or_else(|| lib::config::resolve_backend_url(&config));
    match bootstrap::connect(&registry, kv.as_ref(), address.as_deref()).await {
        Ok(handle) => log::info!("using privategpt at {}", handle.base_url()),
        Err(lib::error::ClientError::UnconfiguredClient) => anyhow::bail!(
            "no PrivateGPT address configured; run `pgpt connect {}`",
            bootstrap::DEFAULT_BACKEND_URL
        ),
        Err(e) => return Err(e.into()),
    }
    Ok(App { registry, kv })
}

async fn run_connect(config_path: Option<PathBuf>, url: Option<String>) -> anyhow::Result<()> {
    let app = open_app(config_path, url).await?;
    let address = app.registry.address().await.unwrap_or_default();
    println!("connected to {}", address);
    Ok(())
}

async fn run_files(
    config_path: Option<PathBuf>,
    url: Option<String>,
    action: FilesAction,
) -> anyhow::Result<()> {
    let app = open_app(config_path, url).await?;
    let catalog = FileCatalog::new(app.registry.clone());
    let surface = Surface::open(SurfaceKind::Chat, app.registry.clone(), app.kv.clone()).await?;
    let files = catalog.refresh().await?;
    surface.prune_selection(&files).await?;
    match action {
        FilesAction::List => print_files(&surface, &files).await,
        FilesAction::Add { path } => {
            let files = catalog.add_file(&path).await?;
            print_files(&surface, &files).await;
        }
        FilesAction::Delete { name } => {
            let files = surface.delete_file(&catalog, &name).await?;
            print_files(&surface, &files).await;
        }
    }
    Ok(())
}

async fn print_files(surface: &Surface, files: &[lib::scope::IngestedFile]) {
    if files.is_empty() {
        println!("(no ingested files)");
        return;
    }
    let selection = surface.settings().await.selection;
    for f in files {
        let mark = if selection.contains(&f.file_name) { "x" } else { " " };
        println!("[{}] {} ({} documents)", mark, f.file_name, f.doc_ids.len());
    }
}

const HELP: &str = "\
commands:
  /mode [query|search|chat]   show or set the mode
  /modes                      list modes
  /system [text]              show or set the system prompt
  /files                      refresh and list ingested files
  /select <file>              select or unselect a file for query/search
  /clear                      stop and clear the conversation
  /connect [url]              show or change the PrivateGPT address
  /exit                       quit
Ctrl-C stops a streaming response.";

async fn run_surface(
    kind: SurfaceKind,
    config_path: Option<PathBuf>,
    url: Option<String>,
) -> anyhow::Result<()> {
    let app = open_app(config_path, url).await?;
    let surface = Surface::open(kind, app.registry.clone(), app.kv.clone()).await?;
    let catalog = FileCatalog::new(app.registry.clone());
    match catalog.refresh().await {
        Ok(files) => surface.prune_selection(&files).await?,
        Err(e) => log::warn!("could not list ingested files: {}", e),
    }

    for message in surface.conversation().messages().await {
        print_message(&message);
    }
    println!(
        "{} mode. /help for commands.",
        surface.settings().await.mode.title()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if let Some(command) = input.strip_prefix('/') {
            if !run_command(&app, &surface, &catalog, command).await? {
                break;
            }
            continue;
        }

        let mut events = surface.subscribe();
        let files = catalog.files().await;
        match surface.send(input, &files).await {
            Ok(None) => {}
            Ok(Some(Sent::Searched(message))) => println!("{}", message.content),
            Ok(Some(Sent::Cancelled)) => println!("[stopped]"),
            Ok(Some(Sent::Streaming(ticket))) => {
                let outcome = ticket.outcome();
                tokio::pin!(outcome);
                let mut printed = 0;
                let outcome = loop {
                    tokio::select! {
                        outcome = &mut outcome => break outcome,
                        event = events.recv() => {
                            if let Ok(SurfaceEvent::BufferUpdated(total)) = event {
                                if let Some(delta) = total.get(printed..) {
                                    stdout.write_all(delta.as_bytes()).await?;
                                    stdout.flush().await?;
                                }
                                printed = total.len();
                            }
                        }
                        _ = tokio::signal::ctrl_c() => {
                            surface.stop().await;
                        }
                    }
                };
                match outcome {
                    Outcome::Finished(message) => {
                        if let Some(rest) = message.content.get(printed..) {
                            stdout.write_all(rest.as_bytes()).await?;
                        }
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await?;
                        print_sources(&message);
                    }
                    Outcome::Cancelled => println!("\n[stopped]"),
                    Outcome::Failed(e) => eprintln!("\nerror: {}", e),
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }
    surface.stop().await;
    Ok(())
}

/// Run a slash command. Returns false to quit.
async fn run_command(
    app: &App,
    surface: &Surface,
    catalog: &FileCatalog,
    command: &str,
) -> anyhow::Result<bool> {
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));
    match name {
        "exit" | "quit" => return Ok(false),
        "help" => println!("{}", HELP),
        "modes" => {
            for mode in Mode::ALL {
                println!("  {:<7} {}: {}", mode.as_str(), mode.title(), mode.description());
            }
        }
        "mode" if arg.is_empty() => println!("{}", surface.settings().await.mode.title()),
        "mode" => match arg.parse::<Mode>() {
            Ok(mode) => {
                surface.set_mode(mode).await?;
                println!("mode: {}", mode.title());
            }
            Err(e) => eprintln!("{}", e),
        },
        "system" if arg.is_empty() => {
            let prompt = surface.settings().await.system_prompt;
            if prompt.trim().is_empty() {
                println!("(no system prompt)");
            } else {
                println!("{}", prompt);
            }
        }
        "system" => {
            surface.set_system_prompt(arg).await?;
            println!("system prompt set");
        }
        "files" => match catalog.refresh().await {
            Ok(files) => {
                surface.prune_selection(&files).await?;
                print_files(surface, &files).await;
            }
            Err(e) => eprintln!("error: {}", e),
        },
        "select" if arg.is_empty() => eprintln!("usage: /select <file>"),
        "select" => {
            let known = catalog.files().await.iter().any(|f| f.file_name == arg);
            if !known && !surface.settings().await.selection.contains(arg) {
                eprintln!("not an ingested file: {} (try /files)", arg);
            } else if surface.toggle_file(arg).await? {
                println!("selected {}", arg);
            } else {
                println!("unselected {}", arg);
            }
        }
        "clear" => {
            surface.clear().await?;
            println!("cleared");
        }
        "connect" if arg.is_empty() => match app.registry.address().await {
            Some(address) => println!("connected to {}", address),
            None => println!("not connected"),
        },
        "connect" => {
            match bootstrap::connect(&app.registry, app.kv.as_ref(), Some(arg)).await {
                Ok(handle) => {
                    println!("connected to {}", handle.base_url());
                    match catalog.refresh().await {
                        Ok(files) => surface.prune_selection(&files).await?,
                        Err(e) => eprintln!("could not list ingested files: {}", e),
                    }
                }
                Err(e) => eprintln!("error: {}", e),
            }
        }
        other => eprintln!("unknown command /{} (try /help)", other),
    }
    Ok(true)
}

fn print_message(message: &Message) {
    match message.role {
        Role::User => println!("> {}", message.content),
        Role::Assistant => {
            println!("{}", message.content);
            print_sources(message);
        }
    }
}

fn print_sources(message: &Message) {
    let Some(sources) = message.sources.as_ref().filter(|s| !s.is_empty()) else {
        return;
    };
    println!("sources:");
    for source in sources {
        let name = source.file_name.as_deref().unwrap_or(&source.doc_id);
        match source.page_label.as_deref() {
            Some(page) => println!("  - {} (page {})", name, page),
            None => println!("  - {}", name),
        }
    }
}
