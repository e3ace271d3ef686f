//! conclient - console client demo
//!
//! Runs the console client against the in-process loopback host: binds a
//! console, draws into its screen buffer through the client operations,
//! reads the buffer back and renders it on the real terminal.
//!
//! # Quick Start
//!
//! ```text
//! conclient                        # Allocate a console and draw a banner
//! conclient --attach 42            # Attach to the console of pid 42
//! conclient --text hi --fill '#'   # Custom banner and fill character
//! conclient --pty 120x30           # Also start and stop a pseudo console
//! ```

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use conclient::core::types::{StartupFlags, StartupInfo, BACKGROUND_BLUE, FOREGROUND_INTENSITY, FOREGROUND_WHITE};
use conclient::{
    CharInfo, Config, Console, ConsoleSettings, Coord, Kernel, LoopbackHost, ProcessParams, PseudoConsole,
    PseudoConsoleFlags, SmallRect, StdChannel,
};

/// Command line options
struct Options {
    /// Attach to this pid instead of allocating
    attach: Option<u32>,
    /// Banner written at the top left
    text: String,
    /// Character filling the row under the banner
    fill: char,
    /// Pseudo console size
    pty: Option<(i16, i16)>,
    /// Alternate config file
    config: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            attach: None,
            text: "conclient".to_string(),
            fill: '=',
            pty: None,
            config: None,
        }
    }
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("conclient {}", VERSION);
}

fn print_help() {
    eprintln!("conclient {} - console client demo", VERSION);
    eprintln!();
    eprintln!("Usage: conclient [OPTIONS]");
    eprintln!();
    eprintln!("Console options:");
    eprintln!("  (default)             Allocate a new console");
    eprintln!("      --alloc           Allocate a new console");
    eprintln!("  -a, --attach <PID>    Attach to the console of another process");
    eprintln!();
    eprintln!("Drawing options:");
    eprintln!("  -t, --text <TEXT>     Banner text (default: conclient)");
    eprintln!("  -f, --fill <CH>       Fill character (default: =)");
    eprintln!("      --pty <WxH>       Start and close a pseudo console");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -c, --config <PATH>   Config file (default: ~/.conclient/config.toml)");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Logging: RUST_LOG overrides [log] level in the config file");
}

fn parse_size(value: &str) -> Result<(i16, i16), String> {
    let (w, h) = value
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| format!("Invalid size: {} (expected WxH)", value))?;
    let w = w.parse::<i16>().map_err(|_| format!("Invalid width: {}", w))?;
    let h = h.parse::<i16>().map_err(|_| format!("Invalid height: {}", h))?;
    Ok((w, h))
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    let value = |i: usize, what: &str| -> Result<String, String> {
        args.get(i).cloned().ok_or_else(|| format!("Missing {} argument", what))
    };

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
            "--alloc" => {
                options.attach = None;
            }
            "-a" | "--attach" => {
                i += 1;
                let pid = value(i, "pid")?;
                options.attach = Some(pid.parse().map_err(|_| format!("Invalid pid: {}", pid))?);
            }
            "-t" | "--text" => {
                i += 1;
                options.text = value(i, "text")?;
            }
            "-f" | "--fill" => {
                i += 1;
                let fill = value(i, "fill")?;
                let mut chars = fill.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => options.fill = ch,
                    _ => return Err(format!("Fill must be one character: {}", fill)),
                }
            }
            "--pty" => {
                i += 1;
                options.pty = Some(parse_size(&value(i, "size")?)?);
            }
            "-c" | "--config" => {
                i += 1;
                options.config = Some(PathBuf::from(value(i, "config")?));
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let log_file = config.log.file.as_ref().and_then(|path| {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::OpenOptions::new().create(true).append(true).open(path).ok()
    });

    if let Some(file) = log_file {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = match &options.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    init_logging(&config);
    info!("conclient {} starting...", VERSION);

    let width = i16::try_from(config.demo.width).context("demo width")?;
    let height = i16::try_from(config.demo.height).context("demo height")?;

    let host = Arc::new(LoopbackHost::new());
    let params = ProcessParams {
        pid: std::process::id(),
        image_path: env::args().next().unwrap_or_else(|| "conclient".to_string()),
        startup: StartupInfo {
            flags: StartupFlags::USECOUNTCHARS,
            count_chars: Coord::new(width, height),
            ..Default::default()
        },
        ..Default::default()
    };
    let console = Arc::new(Console::new(host.clone(), params).with_settings(ConsoleSettings::from(&config)));

    #[cfg(unix)]
    let _interrupts =
        conclient::core::ctrl::install_interrupt_handler(Arc::clone(&console)).context("installing SIGINT handler")?;

    match options.attach {
        Some(pid) => {
            // The loopback host only knows consoles it was told about
            host.add_console_process(pid);
            console.attach(pid).with_context(|| format!("attaching to pid {}", pid))?;
            info!("attached to console of pid {}", pid);
        }
        None => {
            console.alloc().context("allocating console")?;
            info!("allocated console via {}", config.host_command);
        }
    }

    let result = draw(&console, &options);
    if let Some((w, h)) = options.pty {
        if let Err(e) = run_pty(&console, &host, Coord::new(w, h)) {
            warn!("pseudo console demo failed: {:#}", e);
        }
    }
    console.free().context("freeing console")?;
    result
}

/// Draw a banner, fill and scroll it, then render the buffer
fn draw(console: &Console, options: &Options) -> anyhow::Result<()> {
    let out = console
        .std_handle(StdChannel::Output)
        .context("console has no output channel")?;

    console.set_title(&format!("conclient - {}", options.text))?;
    let info = console.screen_buffer_info(out).context("querying screen buffer")?;
    let width = info.size.x;
    if width <= 0 || info.size.y <= 0 {
        anyhow::bail!("screen buffer has no cells ({}x{})", info.size.x, info.size.y);
    }

    let banner: Vec<u16> = options.text.encode_utf16().take(width as usize).collect();
    let written = console.write_output_character(out, &banner, Coord::new(0, 0))?;
    console.fill_output_attribute(out, FOREGROUND_WHITE | FOREGROUND_INTENSITY | BACKGROUND_BLUE, written, Coord::new(0, 0))?;

    let mut fill = [0u16; 2];
    let fill = options.fill.encode_utf16(&mut fill);
    console.fill_output_character(out, fill[0], width as u32, Coord::new(0, 1))?;

    // Copy the banner rows two lines down
    let scroll = SmallRect::new(0, 0, width - 1, 1);
    console.scroll_screen_buffer(out, &scroll, None, Coord::new(0, 3), CharInfo::new(' ' as u16, FOREGROUND_WHITE))?;

    let rows = 5i16.min(info.size.y);
    let size = Coord::new(width, rows);
    let mut cells = vec![CharInfo::default(); width as usize * rows as usize];
    let mut region = SmallRect::new(0, 0, width - 1, rows - 1);
    console.read_output(out, &mut cells, size, Coord::new(0, 0), &mut region)?;
    info!("read back region {:?}", region);

    render(&cells, width as usize)?;
    eprintln!("title: {}", console.title()?);
    Ok(())
}

fn run_pty(console: &Console, host: &Arc<LoopbackHost>, size: Coord) -> anyhow::Result<()> {
    let input = host.create_event(true, false, false).context("creating input endpoint")?;
    let output = host.create_event(true, false, false).context("creating output endpoint")?;

    let result = PseudoConsole::create(console, size, input, output, PseudoConsoleFlags::empty())
        .map(|mut pty| {
            info!("pseudo console {}x{} ready", pty.size().x, pty.size().y);
            pty.close();
        })
        .context("creating pseudo console");

    let _ = host.close(input);
    let _ = host.close(output);
    result
}

fn attr_color(nibble: u16) -> Color {
    match nibble & 0xf {
        0x0 => Color::Black,
        0x1 => Color::DarkBlue,
        0x2 => Color::DarkGreen,
        0x3 => Color::DarkCyan,
        0x4 => Color::DarkRed,
        0x5 => Color::DarkMagenta,
        0x6 => Color::DarkYellow,
        0x7 => Color::Grey,
        0x8 => Color::DarkGrey,
        0x9 => Color::Blue,
        0xa => Color::Green,
        0xb => Color::Cyan,
        0xc => Color::Red,
        0xd => Color::Magenta,
        0xe => Color::Yellow,
        _ => Color::White,
    }
}

/// Render cells on stdout using their attribute colors
fn render(cells: &[CharInfo], width: usize) -> io::Result<()> {
    if width == 0 {
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    for row in cells.chunks(width) {
        for cell in row {
            let ch = char::from_u32(cell.ch as u32).unwrap_or(' ');
            queue!(
                stdout,
                SetForegroundColor(attr_color(cell.attr)),
                SetBackgroundColor(attr_color(cell.attr >> 4)),
                Print(ch)
            )?;
        }
        queue!(stdout, ResetColor, Print("\r\n"))?;
    }
    stdout.flush()
}
