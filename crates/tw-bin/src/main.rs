//! termweb entrypoint.

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use core_chrome::{ChromeProcess, LaunchOptions, ScreencastSink, find_binary};
use core_config::Config;
use core_events::{EVENT_CHANNEL_CAP, Event, EventSourceRegistry, TickEventSource};
use core_frame::FramePool;
use core_render::{ContentTransmission, Renderer, TermExtent};
use core_rpc::{RpcClient, Transport};
use core_terminal::{BackendOptions, CrosstermBackend, TerminalBackend, TerminalCapabilities};
use core_viewer::{Viewer, ViewerOptions};

/// Frame-pool poll cadence for the render path.
const FRAME_TICK: Duration = Duration::from_millis(16);
/// Mouse coalescing cadence (≈30 Hz).
const BUS_TICK: Duration = Duration::from_millis(33);

#[derive(Parser, Debug)]
#[command(name = "termweb", version, about = "Web browser for image-protocol terminals")]
struct Args {
    #[command(subcommand)]
    command: Command,
    /// Optional configuration file path (overrides discovery of `termweb.toml`).
    #[arg(long = "config", global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch an interactive browsing session.
    Open {
        url: String,
        /// Emulate a mobile viewport.
        #[arg(long)]
        mobile: bool,
        /// Device pixel ratio override.
        #[arg(long)]
        scale: Option<f64>,
    },
    /// Print capability diagnostics.
    Doctor,
    /// Print the version string.
    Version,
}

fn main() {
    let args = Args::parse();
    let code = match args.command {
        Command::Version => {
            println!("termweb {}", env!("CARGO_PKG_VERSION"));
            0
        }
        Command::Doctor => doctor(),
        Command::Open { url, mobile, scale } => {
            let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
            match runtime.block_on(open(url, mobile, scale, args.config)) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("termweb: {e:#}");
                    1
                }
            }
        }
    };
    std::process::exit(code);
}

fn configure_logging() -> Option<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(Path::new("."), "termweb.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => Some(guard),
        // A global subscriber is already installed; drop the guard so the
        // writer shuts down.
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            // Put the terminal back before the default hook prints.
            let mut out = std::io::stdout();
            use std::io::Write;
            let _ = write!(out, "\x1b[?1016l");
            let _ = crossterm::execute!(
                out,
                crossterm::event::DisableMouseCapture,
                crossterm::event::DisableBracketedPaste,
                crossterm::cursor::Show,
                crossterm::terminal::LeaveAlternateScreen,
            );
            let _ = crossterm::terminal::disable_raw_mode();
            tracing::error!(target: "runtime.panic", ?panic_info, "panic");
            default_panic(panic_info);
        }));
    });
}

fn doctor() -> i32 {
    let caps = TerminalCapabilities::detect();
    let binary = find_binary();
    #[cfg(unix)]
    let shm = core_frame::shm::probe().usable();
    #[cfg(not(unix))]
    let shm = false;

    let mut failed = false;
    let mut report = |ok: bool, required: bool, what: &str, hint: &str| {
        let mark = if ok { "✓" } else { "✗" };
        println!("{mark} {what}");
        if !ok {
            println!("    {hint}");
            if required {
                failed = true;
            }
        }
    };

    report(
        caps.supports_images,
        true,
        "terminal image protocol",
        "run inside kitty, WezTerm, or ghostty",
    );
    report(
        caps.supports_truecolor,
        false,
        "truecolor",
        "set COLORTERM=truecolor or use a 24-bit terminal",
    );
    report(
        caps.supports_pixel_mouse,
        false,
        "pixel mouse reporting",
        "cell-precision mouse will be used instead",
    );
    report(
        binary.is_some(),
        true,
        "browser binary",
        "install chromium or set CHROME_BIN",
    );
    report(
        shm,
        false,
        "shared-memory frames",
        "inline transmission will be used (set TERMWEB_FORCE_SHM=1 to override)",
    );
    if let Some(path) = binary {
        println!("  browser: {}", path.display());
    }
    if failed { 1 } else { 0 }
}

async fn open(
    url: String,
    mobile: bool,
    scale: Option<f64>,
    config_path: Option<std::path::PathBuf>,
) -> Result<()> {
    let _log_guard = configure_logging();
    install_panic_hook();
    info!(target: "runtime", "startup");

    let config: Config = core_config::load_from(config_path)?;
    let caps = TerminalCapabilities::detect();
    if !caps.supports_images {
        bail!("this terminal does not support the image protocol (try `termweb doctor`)");
    }

    // Browser first: launch failures should not disturb the terminal.
    let mut chrome = ChromeProcess::launch(&LaunchOptions::default())
        .await
        .context("browser launch failed")?;
    let transport = Transport::connect(&chrome.ws_url)
        .await
        .context("browser connection failed")?;
    let client = RpcClient::new(transport);

    let pool = build_pool(&caps)?;
    client
        .install_interceptor(Box::new(ScreencastSink::new(
            std::sync::Arc::clone(&pool),
            client.poster(),
        )))
        .ok();

    let mut backend = CrosstermBackend::new(BackendOptions {
        pixel_mouse: caps.supports_pixel_mouse,
        enhanced_keys: true,
    });
    backend.set_title("termweb")?;
    let guard = backend.enter_guard()?;

    let (cols, rows, width_px, height_px) = CrosstermBackend::extent()?;
    let term = TermExtent {
        cols,
        rows,
        width_px,
        height_px,
        pixel_mouse: caps.supports_pixel_mouse,
    };

    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    let (input_task, input_shutdown) = core_input::spawn_async_input(tx.clone());
    let mut registry = EventSourceRegistry::new();
    registry.register(TickEventSource::new("frame", FRAME_TICK, Event::FrameTick));
    registry.register(TickEventSource::new("bus", BUS_TICK, Event::BusTick));
    let tick_tasks = registry.spawn_all(&tx);

    // Forward unsolicited browser events into the runtime channel. The
    // forwarder owns a bounded subscription; the reader never blocks on us.
    let forwarder = {
        let mut events = client.subscribe(&["Page.", "Target.", "Browser.", "Inspector."]);
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = events.next().await {
                if tx.send(Event::Browser(ev)).await.is_err() {
                    return;
                }
            }
            // Stream closed: the browser went away.
            let _ = tx.send(Event::Shutdown).await;
        })
    };

    let transmission = content_transmission(&caps);
    let renderer = Renderer::new(transmission, caps.supports_truecolor);
    let session = core_chrome::BrowserSession::new(std::sync::Arc::clone(&client));
    // CLI scale wins over the config value.
    let dpr = scale.unwrap_or(config.file.viewer.scale).clamp(0.25, 4.0);
    let mut viewer = Viewer::new(
        session,
        pool,
        renderer,
        config,
        term,
        ViewerOptions { mobile, scale: dpr },
    );

    let result = async {
        viewer.bootstrap(&url).await?;
        viewer.run(rx).await
    }
    .await;

    // Teardown in reverse order: stop producers, then the terminal guard
    // restores the screen, then the browser dies.
    input_shutdown.signal();
    drop(tx);
    let _ = tokio::time::timeout(Duration::from_millis(500), input_task).await;
    for task in tick_tasks {
        let _ = tokio::time::timeout(Duration::from_millis(100), task).await;
    }
    forwarder.abort();
    drop(guard);
    chrome.kill().await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(target: "runtime", error = %e, "fatal");
            Err(e)
        }
    }
}

fn build_pool(caps: &TerminalCapabilities) -> Result<std::sync::Arc<FramePool>> {
    #[cfg(unix)]
    {
        if caps.same_host && core_frame::shm::probe().usable() {
            match FramePool::new_shm() {
                Ok(pool) => {
                    info!(target: "runtime", "frame pool backed by shared memory");
                    return Ok(pool);
                }
                Err(e) => {
                    tracing::warn!(target: "runtime", error = %e, "shm pool failed; heap fallback");
                }
            }
        }
    }
    let _ = caps;
    Ok(FramePool::new_heap()?)
}

fn content_transmission(caps: &TerminalCapabilities) -> ContentTransmission {
    #[cfg(unix)]
    {
        if caps.same_host && core_frame::shm::probe().usable() {
            return ContentTransmission::SharedMem;
        }
    }
    let _ = caps;
    ContentTransmission::Inline
}
