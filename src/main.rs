use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vtstream::capture::{CursorRegs, TextGeometry, VideoMode, VideoSource, TEXT_PLANE_BASE};
use vtstream::input::KeyboardSink;
use vtstream::{StreamConfig, TextStream};

/// Serves a synthetic 80x25 text screen so the whole stack can be exercised
/// without an emulator: `vtstream --socket /tmp/vt.sock`, then connect a
/// viewer (or `nc -U`) to watch the marquee and type at it.
#[derive(Debug, Parser)]
#[command(name = "vtstream")]
struct Cli {
    /// Unix socket path to listen on.
    #[arg(long, default_value = "/tmp/vtstream.sock")]
    socket: PathBuf,

    /// Display refreshes per second.
    #[arg(long, default_value_t = 60)]
    fps: u32,
}

const COLS: usize = 80;
const ROWS: usize = 25;

/// An in-memory stand-in for the emulator's text plane and CRTC registers.
struct DemoScreen {
    plane: Vec<u8>,
    tick: u64,
    cursor_pos: u16,
}

impl DemoScreen {
    fn new() -> Self {
        let mut demo = Self {
            plane: vec![0; COLS * ROWS * 2],
            tick: 0,
            cursor_pos: 0,
        };
        demo.paint();
        demo
    }

    fn put(&mut self, row: usize, col: usize, glyph: u8, attr: u8) {
        let index = (row * COLS + col) * 2;
        self.plane[index] = glyph;
        self.plane[index + 1] = attr;
    }

    fn put_str(&mut self, row: usize, col: usize, text: &str, attr: u8) {
        for (i, byte) in text.bytes().enumerate() {
            if col + i < COLS {
                self.put(row, col + i, byte, attr);
            }
        }
    }

    fn advance(&mut self) {
        self.tick += 1;
        self.paint();
    }

    fn paint(&mut self) {
        for row in 0..ROWS {
            for col in 0..COLS {
                self.put(row, col, 0x20, 0x07);
            }
        }

        // Banner row, white on blue, framed with double lines.
        for col in 0..COLS {
            self.put(0, col, 0xCD, 0x1F);
        }
        self.put_str(0, 2, " vtstream demo host ", 0x1F);

        let seconds = self.tick / 60;
        self.put_str(2, 2, &format!("uptime: {seconds:>6}s"), 0x0A);
        self.put_str(3, 2, &format!("ticks:  {:>6}", self.tick), 0x07);

        // A block crawling along a marquee line keeps diffs flowing.
        let lane = 12;
        let pos = (self.tick as usize / 4) % COLS;
        for col in 0..COLS {
            self.put(lane, col, 0xB0, 0x08);
        }
        self.put(lane, pos, 0xDB, 0x0E);

        self.put_str(ROWS - 1, 2, "keys typed in the viewer land in the log", 0x70);

        self.cursor_pos = (lane * COLS + pos) as u16;
    }
}

impl VideoSource for DemoScreen {
    fn mode(&self) -> VideoMode {
        VideoMode::Text
    }

    fn text_geometry(&self) -> TextGeometry {
        TextGeometry {
            offset: (COLS / 2) as u16,
            max_scanline: 15,
            vertical_display_end: (ROWS * 16 - 1) as u16,
            display_start: 0,
        }
    }

    fn read_text_byte(&self, addr: u32) -> u8 {
        let index = addr.saturating_sub(TEXT_PLANE_BASE) as usize;
        self.plane.get(index).copied().unwrap_or(0)
    }

    fn cursor_regs(&self) -> CursorRegs {
        CursorRegs {
            location_high: (self.cursor_pos >> 8) as u8,
            location_low: (self.cursor_pos & 0xFF) as u8,
            start: 0x0D,
        }
    }
}

/// The demo has no keyboard buffer; injected keycodes go to the log.
struct LogSink;

impl KeyboardSink for LogSink {
    fn inject_key(&self, keycode: u16) {
        info!(keycode = %format_args!("{keycode:#06x}"), "key injected");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let sink: Arc<dyn KeyboardSink> = Arc::new(LogSink);
    let mut stream = TextStream::listen(
        StreamConfig {
            primary_path: cli.socket.clone(),
            bulk_path: None,
        },
        sink,
    )
    .context("failed to open listener")?;

    info!(socket = %cli.socket.display(), "demo host running, ctrl-c to stop");

    let mut demo = DemoScreen::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / cli.fps.max(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                demo.advance();
                stream.on_vsync(&demo);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    stream.close();
    Ok(())
}
