/// board-watch: follow one board live and log its reconciled state.
use boardsync_client::api::CommandApi;
use boardsync_client::config::{self, ConfigError};
use boardsync_client::{
    ApiError, ConnectionError, ConnectionManager, HttpCommandApi, ReconcileError, Reconciler,
    ReconnectPolicy,
};
use boardsync_core::event::EventKind;
use boardsync_core::EventDispatcher;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const SUMMARY_INTERVAL: Duration = Duration::from_secs(30);

/// Follow a kanban board live and log its reconciled state
#[derive(Parser)]
#[command(name = "board-watch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = r#"
Hydrates a board from the REST service, subscribes to its push channel and
logs a summary of the reconciled board every 30 seconds until Ctrl-C.

Without a board id (and none in the config file) the boards visible to the
token are listed instead.

Examples:
  board-watch 3                  # Watch board 3
  board-watch 3 --remember       # Watch board 3 and make it the default
  board-watch --config ./c.json  # Use an explicit config file
"#)]
struct Cli {
    /// Board to watch; defaults to `board_id` from the config file
    #[arg(value_name = "BOARD_ID")]
    board_id: Option<i64>,

    /// Config file to use instead of the platform default
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Bearer token for the REST service and push channel
    #[arg(long, env = "BOARDSYNC_TOKEN", hide_env_values = true)]
    token: String,

    /// Store BOARD_ID as the default board in the config file
    #[arg(long, requires = "board_id")]
    remember: bool,
}

#[derive(Debug, thiserror::Error)]
enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

async fn run(cli: Cli) -> Result<(), WatchError> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = match &cli.config {
        Some(path) => config::load_config_strict(path)?,
        None => config::load_config(&config_path),
    };
    let api = Arc::new(HttpCommandApi::new(config.api_base(), cli.token.clone()));

    let Some(board_id) = cli.board_id.or(config.board_id) else {
        return list_boards(&api).await;
    };
    if cli.remember {
        config::remember_board(&config_path, board_id)?;
        log::info!("[board-watch] Saved board {} to {}", board_id, config_path.display());
    }

    let reconciler = Reconciler::new(api);
    reconciler.select_board(board_id).await?;

    let dispatcher = EventDispatcher::new();
    reconciler.attach(&dispatcher);
    for kind in [EventKind::Connected, EventKind::Disconnected] {
        dispatcher.on(kind, move |event| {
            log::info!("[board-watch] {:?}", event);
        });
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.run(shutdown_rx).await })
    };

    let connection = ConnectionManager::new(
        &config.ws_base(),
        dispatcher,
        ReconnectPolicy::from(config.reconnect),
    );
    connection.connect(board_id, &cli.token)?;

    let mut ticker = tokio::time::interval(SUMMARY_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => log_summary(&reconciler),
            _ = tokio::signal::ctrl_c() => {
                log::info!("[board-watch] Shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    connection.shutdown().await;
    let _ = worker.await;
    Ok(())
}

async fn list_boards(api: &HttpCommandApi) -> Result<(), WatchError> {
    let boards = api.list_boards().await?;
    if boards.is_empty() {
        println!("No boards available.");
    }
    for board in boards {
        println!("{:>6}  {}", board.id, board.name);
    }
    Ok(())
}

fn log_summary(reconciler: &Reconciler<HttpCommandApi>) {
    let Some(board) = reconciler.view() else {
        return;
    };
    let columns: Vec<String> = board
        .columns
        .iter()
        .map(|c| format!("{}={}", c.name, c.tasks.len()))
        .collect();
    let online: Vec<String> = reconciler
        .online_users()
        .into_iter()
        .map(|u| u.username)
        .collect();
    let channel = if reconciler.is_connected() { "live" } else { "offline" };
    log::info!(
        "[board-watch] {} ({}) [{}] online: [{}] recent issues: {}",
        board.name,
        channel,
        columns.join(", "),
        online.join(", "),
        boardsync_client::logging::recent_entries().len()
    );
    if let Some(error) = reconciler.take_error() {
        log::warn!("[board-watch] {}", error);
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = boardsync_client::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }
    if let Err(e) = run(cli).await {
        log::error!("[board-watch] {}", e);
        std::process::exit(1);
    }
}
