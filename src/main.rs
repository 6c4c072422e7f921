//! `octotray` -- control OctoPrint and Moonraker printers from the terminal.
//!
//! Printers are read from `printers.toml` (see [`octotray::config`]). Every
//! command acts on one printer, picked with `--printer` by index or host and
//! defaulting to the first. Risky commands ask for confirmation on the
//! terminal unless `--yes` is given.
use std::convert::Infallible;
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_stream::try_stream;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, Response, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::{Parser, Subcommand, ValueEnum};
use futures_core::Stream;
use octotray::{
    camera::DEFAULT_REFRESH, config, AutoAnswer, Axes, Axis, BackendKind, ConfigStore,
    ConfirmationOracle, Credential, Device, HttpTransport, Outcome, PrinterClient, SessionSignal,
    SnapshotFeed, SystemBrowser, TomlConfigStore,
};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Client = PrinterClient<HttpTransport, dyn ConfirmationOracle>;

#[derive(Parser, Debug)]
#[command(name = "octotray", version, about)]
struct Cli {
    /// Printer to act on, by index or host.
    #[arg(short, long, global = true)]
    printer: Option<String>,

    /// Answer "yes" to every safety prompt.
    #[arg(short, long, global = true)]
    yes: bool,

    /// Configuration file to use instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured printers.
    List,
    /// Show job progress and temperatures.
    Status,
    /// List the discovered power method and commands.
    Commands,
    /// Run a discovered command by name.
    Run { name: String },
    /// Switch the printer on.
    On,
    /// Switch the printer off.
    Off,
    /// Home the given axes, e.g. `xy`.
    Home {
        #[arg(default_value = "xyz")]
        axes: Axes,
    },
    /// Move one axis. The distance defaults to the configured jog length.
    Jog {
        axis: Axis,
        #[arg(allow_negative_numbers = true)]
        distance: Option<f64>,
        /// Move to the position instead of by the distance.
        #[arg(long)]
        absolute: bool,
    },
    /// Pause the running job, or resume it.
    Pause,
    /// Cancel the running job.
    Cancel,
    /// Heat to the configured preheat temperature.
    Preheat {
        #[arg(value_enum)]
        heater: Heater,
    },
    /// Turn off the hotend and the bed.
    Cooldown,
    /// List the most recent files.
    Files {
        #[arg(default_value_t = 10)]
        count: usize,
    },
    /// Start printing a file as listed by `files`.
    Print { path: String },
    /// Serve the webcam as an MJPEG stream at `/live`.
    Webcam {
        #[arg(long, default_value = "127.0.0.1:3000")]
        listen: SocketAddr,
        /// Milliseconds between snapshots.
        #[arg(long, default_value_t = DEFAULT_REFRESH.as_millis() as u64)]
        refresh: u64,
    },
    /// Open the web interface in a browser.
    Web,
    /// Log status changes of every printer. `r` + Enter reloads, `q` quits.
    Monitor {
        /// Seconds between status polls.
        #[arg(long, default_value_t = 10)]
        interval: u64,
    },
    /// Add a printer to the configuration.
    Add {
        host: String,
        #[arg(long, value_enum)]
        backend: BackendArg,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        tool_preheat: Option<u32>,
        #[arg(long)]
        bed_preheat: Option<u32>,
        #[arg(long, default_value_t = config::DEFAULT_JOG_SPEED)]
        jog_speed: u32,
        #[arg(long, default_value_t = config::DEFAULT_JOG_LENGTH)]
        jog_length: u32,
        #[arg(long, default_value_t = 0)]
        webcam: usize,
    },
    /// Remove the selected printer from the configuration.
    Remove,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Heater {
    Tool,
    Bed,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Octoprint,
    Moonraker,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Octoprint => BackendKind::OctoPrint,
            BackendArg::Moonraker => BackendKind::Moonraker,
        }
    }
}

/// Asks on stdin/stderr.
struct TerminalOracle;

impl ConfirmationOracle for TerminalOracle {
    fn ask(&self, title: &str, primary: &str, secondary: Option<&str>, yes_no: bool) -> bool {
        tokio::task::block_in_place(|| {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{title}: {primary}");
            if let Some(secondary) = secondary {
                let _ = writeln!(stderr, "{secondary}");
            }
            if !yes_no {
                return true;
            }
            let _ = write!(stderr, "[y/N] ");
            let _ = stderr.flush();

            let mut answer = String::new();
            if std::io::stdin().lock().read_line(&mut answer).is_err() {
                return false;
            }
            matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "octotray=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let store = match &cli.config {
        Some(path) => TomlConfigStore::new(path),
        None => TomlConfigStore::from_env(),
    };
    let transport = Arc::new(HttpTransport::new());
    let oracle: Arc<dyn ConfirmationOracle> = if cli.yes {
        Arc::new(AutoAnswer(true))
    } else {
        Arc::new(TerminalOracle)
    };

    match cli.command {
        Command::List => list(&store),
        Command::Add {
            host,
            backend,
            api_key,
            tool_preheat,
            bed_preheat,
            jog_speed,
            jog_length,
            webcam,
        } => {
            let device = Device {
                host,
                backend: backend.into(),
                credential: api_key.map_or(Credential::None, |key| Credential::ApiKey(key.into())),
                tool_preheat,
                bed_preheat,
                jog_speed,
                jog_length,
                webcam_index: webcam,
            };
            add(&store, device)
        }
        Command::Remove => remove(&store, cli.printer.as_deref()),
        Command::Monitor { interval } => monitor(&store, transport, oracle, interval).await,
        command => {
            let device = selected(&store, cli.printer.as_deref())?;
            let client = PrinterClient::connect(device, transport.clone(), oracle).await;
            act(&client, transport, command).await
        }
    }
}

fn selected(store: &TomlConfigStore, selector: Option<&str>) -> Result<Device> {
    let devices = store
        .load_devices()
        .with_context(|| format!("loading {}", store.path().display()))?;
    let device = match selector {
        Some(selector) => config::select(&devices, selector),
        None => devices.first(),
    };
    match device {
        Some(device) => Ok(device.clone()),
        None if devices.is_empty() => bail!(
            "no printers configured in {}, add one with `octotray add`",
            store.path().display()
        ),
        None => bail!("no printer matches {:?}", selector.unwrap_or_default()),
    }
}

fn list(store: &TomlConfigStore) -> Result<()> {
    for (index, device) in store.load_devices()?.iter().enumerate() {
        println!("{index}: {} ({:?})", device.host, device.backend);
    }
    Ok(())
}

fn add(store: &TomlConfigStore, device: Device) -> Result<()> {
    let mut devices = store.load_devices()?;
    if devices.iter().any(|existing| existing.host == device.host) {
        bail!("{} is already configured", device.host);
    }
    devices.push(device);
    store.save_devices(&devices)?;
    Ok(())
}

fn remove(store: &TomlConfigStore, selector: Option<&str>) -> Result<()> {
    let Some(selector) = selector else {
        bail!("pick the printer to remove with --printer");
    };
    let mut devices = store.load_devices()?;
    let Some(host) = config::select(&devices, selector).map(|device| device.host.clone()) else {
        bail!("no printer matches {selector:?}");
    };
    devices.retain(|device| device.host != host);
    store.save_devices(&devices)?;
    Ok(())
}

fn report(client: &Client, outcome: Outcome) -> Result<()> {
    if !outcome.is_success() {
        bail!("{}: {outcome}", client.host());
    }
    Ok(())
}

async fn act(client: &Client, transport: Arc<HttpTransport>, command: Command) -> Result<()> {
    let outcome = match command {
        Command::Status => {
            let status = client.status_summary().await;
            if status.warning {
                eprintln!("{}", status.title);
            }
            println!("{}", status.text);
            return Ok(());
        }
        Command::Commands => {
            let capabilities = client.capabilities();
            println!("power: {:?}", capabilities.power);
            for command in &capabilities.commands {
                println!("{}", command.name);
            }
            return Ok(());
        }
        Command::Files { count } => {
            for file in client.recent_files(count).await {
                let date = chrono::DateTime::from_timestamp(file.date as i64, 0)
                    .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{date}  {}  {}", file.name, file.path);
            }
            return Ok(());
        }
        Command::Webcam { listen, refresh } => {
            return webcam(client, transport, listen, Duration::from_millis(refresh)).await;
        }
        Command::Run { name } => client.run_named_command(&name).await,
        Command::On => client.turn_on().await,
        Command::Off => client.turn_off().await,
        Command::Home { axes } => client.home(axes).await,
        Command::Jog {
            axis,
            distance,
            absolute,
        } => {
            let distance = distance.unwrap_or(f64::from(client.device().jog_length));
            client.jog(axis, distance, !absolute).await
        }
        Command::Pause => client.pause_resume().await,
        Command::Cancel => client.cancel_job().await,
        Command::Preheat { heater: Heater::Tool } => client.preheat_tool().await,
        Command::Preheat { heater: Heater::Bed } => client.preheat_bed().await,
        Command::Cooldown => client.cooldown().await,
        Command::Print { path } => client.print_file(&path).await,
        Command::Web => client.open_web_ui(&SystemBrowser),
        other @ (Command::List | Command::Add { .. } | Command::Remove | Command::Monitor { .. }) => {
            bail!("{other:?} does not act on a single printer")
        }
    };
    report(client, outcome)
}

async fn monitor(
    store: &TomlConfigStore,
    transport: Arc<HttpTransport>,
    oracle: Arc<dyn ConfirmationOracle>,
    interval: u64,
) -> Result<()> {
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn({
        let tx = tx.clone();
        async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let signal = match line.trim() {
                    "r" => SessionSignal::Restart,
                    "q" => SessionSignal::Quit,
                    _ => continue,
                };
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
        }
    });
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(SessionSignal::Quit).await;
        }
    });

    let period = Duration::from_secs(interval.max(1));
    let sessions = octotray::session::run(store, transport, oracle, rx, |session| {
        if session.is_empty() {
            tracing::warn!("no printers configured");
        }
        session.watch_status(period)
    })
    .await?;
    tracing::info!(sessions, "monitor stopped");
    Ok(())
}

#[derive(Clone)]
struct AppState {
    tx: broadcast::Sender<Bytes>,
}

async fn webcam(
    client: &Client,
    transport: Arc<HttpTransport>,
    listen: SocketAddr,
    refresh: Duration,
) -> Result<()> {
    let Some(url) = client.webcam_url().await else {
        bail!("{} has no webcam", client.host());
    };
    let (tx, _rx) = broadcast::channel(16);
    let poller = SnapshotFeed::new(transport, url).spawn(refresh, tx.clone());

    let app = Router::new()
        .route("/live", get(live_stream))
        .with_state(Arc::new(AppState { tx }));

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    tracing::info!("serving MJPEG on http://{listen}/live");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    poller.join().await;
    Ok(())
}

fn mjpeg_stream(
    mut rx: broadcast::Receiver<Bytes>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    try_stream! {
        loop {
            let frame = match rx.recv().await {
                Ok(frame) => frame,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "slow MJPEG client");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let header = format!(
                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                frame.len()
            );
            yield Bytes::from(header);
            yield frame;
            yield Bytes::from("\r\n");
        }
    }
}

async fn live_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rx = state.tx.subscribe();

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )
        .body(Body::from_stream(mjpeg_stream(rx)))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}
