mod commands;
mod config;
mod openfoodfacts;
mod probe;
mod remote_http;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    build_update, cmd_barcode, cmd_delete, cmd_edit, cmd_goals_set, cmd_goals_show, cmd_log,
    cmd_remote_clear, cmd_remote_set, cmd_signin, cmd_signout, cmd_summary, cmd_sync,
    cmd_watch, cmd_whoami,
};
use crate::config::Config;
use crate::openfoodfacts::OpenFoodFactsClient;
use crate::remote_http::{HttpRemote, Unconfigured};
use macrotrack_core::identity::{IdentityProvider, Session};
use macrotrack_core::remote::{RemoteStore, SqliteRemote};
use macrotrack_core::service::MacroService;

#[derive(Parser)]
#[command(
    name = "macrotrack",
    version,
    about = "A local-first macro tracker that syncs across devices"
)]
struct Cli {
    /// Remote document server URL (overrides the configured one)
    #[arg(long, global = true, value_name = "URL")]
    remote: Option<String>,
    /// More log output on stderr (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in as a principal and pull its data
    Signin {
        /// Principal (account) identifier
        principal: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign out; local data stays on this device
    Signout,
    /// Show the signed-in principal and remote
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage daily macro goals
    Goals {
        #[command(subcommand)]
        command: GoalsCommands,
    },
    /// Log a food entry with its macros
    Log {
        /// Food name
        food: String,
        /// Carbohydrates in grams
        #[arg(short, long, default_value = "0")]
        carbs: f64,
        /// Protein in grams
        #[arg(short, long, default_value = "0")]
        protein: f64,
        /// Fat in grams
        #[arg(short, long, default_value = "0")]
        fat: f64,
        /// Calorie override (default: derived from macros)
        #[arg(long)]
        calories: Option<f64>,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "snack")]
        meal: String,
        /// Date to log for (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look up a food by barcode and log a portion of it
    Barcode {
        /// Barcode number
        code: String,
        /// Amount eaten (e.g. "150g", "2 cups", "1.5oz", "3 cookies"; default 100g)
        amount: Option<String>,
        /// Grams in one item, for amounts in a custom unit like "3 cookies"
        #[arg(long, value_name = "GRAMS")]
        unit_grams: Option<f64>,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "snack")]
        meal: String,
        /// Date to log for (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a logged entry
    Edit {
        /// Entry ID
        entry_id: String,
        /// New food name
        #[arg(long)]
        name: Option<String>,
        /// New meal type
        #[arg(long)]
        meal: Option<String>,
        /// New date
        #[arg(long)]
        date: Option<String>,
        /// New carbohydrates in grams
        #[arg(long)]
        carbs: Option<f64>,
        /// New protein in grams
        #[arg(long)]
        protein: Option<f64>,
        /// New fat in grams
        #[arg(long)]
        fat: Option<f64>,
        /// New calorie override
        #[arg(long, conflicts_with = "clear_calories")]
        calories: Option<f64>,
        /// Drop the calorie override and derive calories from macros
        #[arg(long)]
        clear_calories: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a logged entry
    Delete {
        /// Entry ID
        entry_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show daily summary (defaults to today)
    Summary {
        /// Date to show (YYYY-MM-DD, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pull goals and entries from the remote (or push everything with --push)
    Sync {
        /// Push all local data instead of pulling
        #[arg(long)]
        push: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep running and sync whenever the remote comes back online
    Watch,
    /// Run the remote document server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
    /// Configure the remote document server
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
}

#[derive(Subcommand)]
enum GoalsCommands {
    /// Set daily macro goals in grams
    Set {
        carbs: f64,
        protein: f64,
        fat: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current goals
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RemoteCommands {
    /// Point this device at a document server
    Set {
        /// Server URL, e.g. http://192.168.1.10:8080
        url: String,
        /// API key printed by `macrotrack serve`
        #[arg(long)]
        key: Option<String>,
    },
    /// Forget the remote; changes stay local
    Clear,
}

struct RemoteTarget {
    store: Arc<dyn RemoteStore>,
    probe: Option<(String, u16)>,
}

fn connect_remote(url: Option<&str>, api_key: Option<String>) -> Result<RemoteTarget> {
    let Some(url) = url else {
        return Ok(RemoteTarget {
            store: Arc::new(Unconfigured),
            probe: None,
        });
    };
    let remote = HttpRemote::new(url, api_key)?;
    let probe = remote.host_port();
    Ok(RemoteTarget {
        store: Arc::new(remote),
        probe,
    })
}

/// Everything the log-touching commands need.
struct App {
    service: MacroService,
    session: Arc<Session>,
    probe: Option<(String, u16)>,
}

fn open_app(config: &Config, remote_url: Option<&str>) -> Result<App> {
    let session = Arc::new(Session::new(config.settings.principal.clone()));
    let identity: Arc<dyn IdentityProvider> = session.clone();
    let remote = connect_remote(remote_url, config.settings.remote_api_key.clone())?;
    let service = MacroService::open(&config.db_path, remote.store, identity)?;
    Ok(App {
        service,
        session,
        probe: remote.probe,
    })
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    let remote_url = cli
        .remote
        .clone()
        .or_else(|| config.settings.remote_url.clone());
    let open = |config: &Config| open_app(config, remote_url.as_deref());

    match cli.command {
        Commands::Signin { principal, json } => {
            let app = open(&config)?;
            cmd_signin(&mut config, &app.session, &app.service, &principal, json).await
        }
        Commands::Signout => cmd_signout(&mut config),
        Commands::Whoami { json } => cmd_whoami(&config, remote_url.as_deref(), json),
        Commands::Goals { command } => {
            let app = open(&config)?;
            match command {
                GoalsCommands::Set {
                    carbs,
                    protein,
                    fat,
                    json,
                } => cmd_goals_set(&app.service, carbs, protein, fat, json).await,
                GoalsCommands::Show { json } => cmd_goals_show(&app.service, json),
            }
        }
        Commands::Log {
            food,
            carbs,
            protein,
            fat,
            calories,
            meal,
            date,
            json,
        } => {
            let app = open(&config)?;
            cmd_log(&app.service, &food, carbs, protein, fat, calories, &meal, date, json).await
        }
        Commands::Barcode {
            code,
            amount,
            unit_grams,
            meal,
            date,
            json,
        } => {
            let app = open(&config)?;
            let off = OpenFoodFactsClient::new()?;
            cmd_barcode(&app.service, &off, &code, amount, unit_grams, &meal, date, json).await
        }
        Commands::Edit {
            entry_id,
            name,
            meal,
            date,
            carbs,
            protein,
            fat,
            calories,
            clear_calories,
            json,
        } => {
            let update = build_update(
                name,
                meal.as_deref(),
                date,
                carbs,
                protein,
                fat,
                calories,
                clear_calories,
            )?;
            let app = open(&config)?;
            cmd_edit(&app.service, &entry_id, &update, json).await
        }
        Commands::Delete { entry_id, json } => {
            let app = open(&config)?;
            cmd_delete(&app.service, &entry_id, json).await
        }
        Commands::Summary { date, json } => cmd_summary(&open(&config)?.service, date, json),
        Commands::Sync { push, json } => cmd_sync(&open(&config)?.service, push, json).await,
        Commands::Watch => {
            let app = open(&config)?;
            cmd_watch(&app.service, &app.session, &config, app.probe).await
        }
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let (api_key, new_api_key) = if no_auth {
                (None, false)
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                (Some(key), new)
            };
            let store = Arc::new(SqliteRemote::open(&config.documents_path())?);
            server::start_server(store, port, &bind, api_key, new_api_key).await
        }
        Commands::Remote { command } => match command {
            RemoteCommands::Set { url, key } => cmd_remote_set(&mut config, &url, key),
            RemoteCommands::Clear => cmd_remote_clear(&mut config),
        },
    }
}
