//! ebonterm - a telnet client for roguelike game servers
//!
//! Connects to a telnet game server, answers its option negotiation and
//! emulates the xterm subset the game draws with, showing the result in the
//! local console.
//!
//! # Quick Start
//!
//! ```text
//! ebonterm                       # nethack.alt.org, or the configured host
//! ebonterm localhost:2323        # another server
//! ebonterm --numpad --no-tiles   # digits for movement, ignore tile hints
//! ebonterm --dump                # print the first full screen and exit
//! ```
//!
//! # Keys
//!
//! | Key | Sends |
//! |-----|-------|
//! | Arrows | h j k l (or 4 2 8 6 with `--numpad`) |
//! | Home/End/PgUp/PgDn | y b u n (or 7 1 9 3) |
//! | Ctrl+] | quit |

use std::env;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ebonterm::config::Config;
use ebonterm::core::connection::Connection;
use ebonterm::core::telnet::{TelnetSession, TermEvent};
use ebonterm::ui::{DebugRenderer, KeyMapper, Renderer};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long `--dump` waits for the first complete frame
const DUMP_TIMEOUT: Duration = Duration::from_secs(5);

/// Input poll interval of the interactive loop
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Parsed command line
struct Args {
    config: Config,
    /// Print one screen and exit
    dump: bool,
    /// Write the effective configuration and exit
    write_config: bool,
}

fn print_version() {
    eprintln!("ebonterm {}", VERSION);
}

fn print_help() {
    eprintln!("ebonterm {} - telnet client for roguelike game servers", VERSION);
    eprintln!();
    eprintln!("Usage: ebonterm [OPTIONS] [HOST[:PORT]]");
    eprintln!();
    eprintln!("Connection options:");
    eprintln!("  (default)             Host and port from config.toml (nethack.alt.org:23)");
    eprintln!("  -p, --port <PORT>     Server port");
    eprintln!();
    eprintln!("Display options:");
    eprintln!("  --tiles               Honour the server's tile hints");
    eprintln!("  --no-tiles            Ignore the server's tile hints");
    eprintln!("  --numpad              Send 8/2/4/6... instead of k/j/h/l... for movement");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  --dump                Print the first complete screen and exit");
    eprintln!("  --write-config        Write the effective configuration and exit");
    eprintln!("  -d, --debug           Verbose logging");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Arrows                Move (h/j/k/l or 4/2/8/6)");
    eprintln!("  Home/End/PgUp/PgDn    Move diagonally (y/b/u/n or 7/1/9/3)");
    eprintln!("  Ctrl+]                Quit");
    eprintln!();
    eprintln!("Configuration: ~/.ebonterm/config.toml");
    eprintln!("Log file:      ~/.ebonterm/ebonterm.log (RUST_LOG overrides the level)");
}

/// Parse command line arguments on top of the loaded configuration
fn parse_args(mut config: Config) -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut dump = false;
    let mut write_config = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-p" | "--port" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing port argument".to_string());
                }
                config.port = parse_port(&args[i])?;
            }
            "--tiles" => {
                config.server_tiles = true;
            }
            "--no-tiles" => {
                config.server_tiles = false;
            }
            "--numpad" => {
                config.number_pad = true;
            }
            "--dump" => {
                dump = true;
            }
            "--write-config" => {
                write_config = true;
            }
            "-d" | "--debug" => {
                config.debug = true;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            target => {
                // HOST or HOST:PORT
                match target.rsplit_once(':') {
                    Some((host, port)) => {
                        config.host = host.to_string();
                        config.port = parse_port(port)?;
                    }
                    None => config.host = target.to_string(),
                }
                if config.host.is_empty() {
                    return Err("Empty host name".to_string());
                }
            }
        }
        i += 1;
    }

    Ok(Args {
        config,
        dump,
        write_config,
    })
}

fn parse_port(text: &str) -> Result<u16, String> {
    match text.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("Invalid port: {}", text)),
        Ok(port) => Ok(port),
    }
}

/// Log to ~/.ebonterm/ebonterm.log; RUST_LOG takes precedence over `debug`
fn init_logging(debug: bool) {
    let log_path = Config::data_dir()
        .map(|dir| dir.join("ebonterm.log"))
        .unwrap_or_else(|| std::path::PathBuf::from("ebonterm.log"));

    // Open log file (append mode)
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let fallback = if debug { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args(Config::load()) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };
    let config = args.config;

    if args.write_config {
        match config.save() {
            Ok(path) => eprintln!("Configuration written to {}", path.display()),
            Err(e) => anyhow::bail!(e),
        }
        return Ok(());
    }

    init_logging(config.debug);
    info!("ebonterm {} starting...", VERSION);

    let session = TelnetSession::new(config.session_config())?;
    let mut connection = Connection::new(session, config.send_interval());

    eprintln!("Connecting to {}:{}...", config.host, config.port);
    connection.connect(&config.host, config.port, config.connect_timeout())?;

    if args.dump {
        return run_dump(&mut connection);
    }

    run_terminal(&mut connection, &config)
}

/// Process input until the first complete frame, then print the screen
fn run_dump(connection: &mut Connection) -> anyhow::Result<()> {
    let deadline = Instant::now() + DUMP_TIMEOUT;
    let mut dump = None;
    let mut closed = false;

    while dump.is_none() && !closed && Instant::now() < deadline {
        connection.process_input()?;

        for event in connection.session.take_events() {
            match event {
                TermEvent::FrameComplete if dump.is_none() => {
                    dump = Some(DebugRenderer::render(connection.session.grid()));
                }
                TermEvent::Disconnected => {
                    warn!("Server closed the connection before a full frame");
                    closed = true;
                }
                TermEvent::Diagnostic(e) => debug!("Diagnostic during dump: {}", e),
                _ => {}
            }
        }

        if dump.is_none() && !closed {
            if let Err(e) = connection.tick() {
                warn!("Failed to send: {}", e);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    let dump = match dump {
        Some(dump) => dump,
        None => {
            info!("No complete frame within {:?}", DUMP_TIMEOUT);
            DebugRenderer::render(connection.session.grid())
        }
    };

    print!("{}", dump);
    connection.disconnect();
    Ok(())
}

/// Run the interactive session in the local console
fn run_terminal(connection: &mut Connection, config: &Config) -> anyhow::Result<()> {
    let mut renderer = Renderer::new();
    renderer.init()?;

    let result = event_loop(connection, &mut renderer, config);

    if let Err(e) = &result {
        error!("Event loop failed: {}", e);
    }

    // Cleanup
    connection.disconnect();
    let _ = renderer.cleanup();
    let _ = terminal::disable_raw_mode();

    print!("\x1b[?1049l");
    print!("\x1b[?25h");
    print!("\x1b[0m");
    let _ = std::io::stdout().flush();

    info!("ebonterm exiting");
    result
}

fn is_quit_key(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char(']') && key.modifiers.contains(KeyModifiers::CONTROL)
}

/// Main event loop
fn event_loop(connection: &mut Connection, renderer: &mut Renderer, config: &Config) -> anyhow::Result<()> {
    let mapper = KeyMapper::new(config.number_pad);

    loop {
        connection.process_input()?;
        if let Err(e) = connection.tick() {
            error!("Failed to send: {}", e);
        }

        for event in connection.session.take_events() {
            match event {
                TermEvent::Bell => {
                    print!("\x07");
                }
                TermEvent::BoundsExceeded { x, y } => {
                    warn!("Server drew outside the screen at ({}, {})", x, y);
                }
                TermEvent::Diagnostic(e) => {
                    warn!("Terminal diagnostic ({:?}): {}", e.kind(), e);
                }
                TermEvent::FrameComplete => {
                    debug!("Frame complete");
                }
                TermEvent::Disconnected => {
                    info!("Connection closed");
                    return Ok(());
                }
            }
        }

        renderer.render(connection.session.grid_mut())?;

        if event::poll(POLL_INTERVAL)? {
            match event::read()? {
                Event::Key(key_event) => {
                    // Only process key press events
                    if key_event.kind != KeyEventKind::Press {
                        continue;
                    }

                    if is_quit_key(&key_event) {
                        info!("Quit requested");
                        return Ok(());
                    }

                    if let Some(bytes) = mapper.map(&key_event) {
                        for byte in bytes {
                            connection.session.send_keystroke(byte);
                        }
                    }
                }

                Event::Resize(cols, rows) => {
                    info!("Resize: {}x{}", cols, rows);
                    renderer.invalidate((cols, rows));
                }

                _ => {}
            }
        }
    }
}
