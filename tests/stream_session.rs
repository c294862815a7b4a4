use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use vtstream::capture::{CursorRegs, TextGeometry, VideoMode, VideoSource, TEXT_PLANE_BASE};
use vtstream::input::KeyboardSink;
use vtstream::{StreamConfig, TextStream};

const SERVER_HELLO: [u8; 7] = [0x01, 0x00, 0x01, 0x03, 0x01, 0x02, 0x03];
const MODE_TEXT_80X25: [u8; 5] = [0x10, 0x00, 0x50, 0x00, 0x19];
const FULL_REDRAW_PREFIX: &[u8] = b"\x1b[?25l\x1b[2J\x1b[H\x1b[0;37;40m";

fn socket_path(tag: &str) -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "vtstream-{}-{tag}-{n}.sock",
        std::process::id()
    ))
}

fn wait_until(what: &str, mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if pred() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

/// A scriptable stand-in for the emulator video core.
struct ScriptedVideo {
    mode: VideoMode,
    plane: Vec<u8>,
    cursor: CursorRegs,
}

impl ScriptedVideo {
    fn text_80x25() -> Self {
        let mut plane = vec![0u8; 80 * 25 * 2];
        for cell in plane.chunks_exact_mut(2) {
            cell[0] = 0x20;
            cell[1] = 0x07;
        }
        Self {
            mode: VideoMode::Text,
            plane,
            cursor: CursorRegs {
                location_high: 0,
                location_low: 0,
                start: 0x0D,
            },
        }
    }

    fn put(&mut self, row: usize, col: usize, glyph: u8, attr: u8) {
        let index = (row * 80 + col) * 2;
        self.plane[index] = glyph;
        self.plane[index + 1] = attr;
    }
}

impl VideoSource for ScriptedVideo {
    fn mode(&self) -> VideoMode {
        self.mode
    }

    fn text_geometry(&self) -> TextGeometry {
        TextGeometry {
            offset: 40,
            max_scanline: 15,
            vertical_display_end: 399,
            display_start: 0,
        }
    }

    fn read_text_byte(&self, addr: u32) -> u8 {
        let index = addr.saturating_sub(TEXT_PLANE_BASE) as usize;
        self.plane.get(index).copied().unwrap_or(0)
    }

    fn cursor_regs(&self) -> CursorRegs {
        self.cursor
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<u16>>);

impl RecordingSink {
    fn keys(&self) -> Vec<u16> {
        self.0.lock().unwrap().clone()
    }
}

impl KeyboardSink for RecordingSink {
    fn inject_key(&self, keycode: u16) {
        self.0.lock().unwrap().push(keycode);
    }
}

struct Client {
    stream: UnixStream,
}

impl Client {
    fn connect(path: &PathBuf) -> Self {
        let stream = UnixStream::connect(path).expect("connect to stream socket");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Self { stream }
    }

    fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).expect("frame header");
        let len = ((header[1] as usize) << 16) | ((header[2] as usize) << 8) | header[3] as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).expect("frame payload");
        (header[0], payload)
    }

    fn send_frame(&mut self, channel: u8, payload: &[u8]) {
        let mut frame = vec![
            channel,
            (payload.len() >> 16) as u8,
            (payload.len() >> 8) as u8,
            payload.len() as u8,
        ];
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).expect("send frame");
    }

    fn send_hello(&mut self) {
        self.send_frame(0x00, &SERVER_HELLO);
    }

    /// Asserts nothing arrives for the given window.
    fn expect_silence(&mut self, window: Duration) {
        self.stream.set_read_timeout(Some(window)).unwrap();
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte) {
            Ok(0) => panic!("server closed the connection"),
            Ok(_) => panic!("unexpected bytes from server"),
            Err(err) => assert!(
                matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
                "unexpected read error: {err}"
            ),
        }
        self.stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
    }

    fn at_eof(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(self.stream.read(&mut byte), Ok(0))
    }
}

struct Harness {
    stream: TextStream,
    sink: Arc<RecordingSink>,
    path: PathBuf,
}

impl Harness {
    fn listen(tag: &str) -> Self {
        let path = socket_path(tag);
        let sink = Arc::new(RecordingSink::default());
        let stream = TextStream::listen(
            StreamConfig {
                primary_path: path.clone(),
                bulk_path: None,
            },
            Arc::clone(&sink) as Arc<dyn KeyboardSink>,
        )
        .expect("listen");
        Self { stream, sink, path }
    }

    /// Connects a client and completes the handshake, returning the client
    /// with the greeting and the first mode notification already consumed.
    fn handshaken_client(&mut self) -> Client {
        let mut client = Client::connect(&self.path);
        assert_eq!(client.read_frame(), (0x00, SERVER_HELLO.to_vec()));
        client.send_hello();
        wait_until("handshake", || self.stream.handshake_complete());
        assert_eq!(client.read_frame(), (0x00, MODE_TEXT_80X25.to_vec()));
        client
    }
}

#[test]
fn handshake_then_first_full_frame() {
    let mut harness = Harness::listen("handshake");
    let video = ScriptedVideo::text_80x25();

    let mut client = Client::connect(&harness.path);
    wait_until("connect", || harness.stream.is_connected());
    assert_eq!(client.read_frame(), (0x00, SERVER_HELLO.to_vec()));

    // Ticks before the client HELLO must not produce data or mode frames.
    for _ in 0..5 {
        harness.stream.on_vsync(&video);
    }
    client.expect_silence(Duration::from_millis(200));

    client.send_hello();
    wait_until("handshake", || harness.stream.handshake_complete());
    assert_eq!(client.read_frame(), (0x00, MODE_TEXT_80X25.to_vec()));

    // First tick re-announces the mode it now observes, then paints.
    harness.stream.on_vsync(&video);
    assert_eq!(client.read_frame(), (0x00, MODE_TEXT_80X25.to_vec()));
    let (channel, payload) = client.read_frame();
    assert_eq!(channel, 0x01);
    assert!(payload.starts_with(FULL_REDRAW_PREFIX));
    assert_eq!(
        payload.windows(2).filter(|w| *w == b"\r\n").count(),
        24,
        "one separator per row boundary"
    );
    assert!(payload.ends_with(b"\x1b[?25h"));

    // A steady screen produces no further traffic.
    harness.stream.on_vsync(&video);
    harness.stream.on_vsync(&video);
    client.expect_silence(Duration::from_millis(200));

    harness.stream.close();
    assert!(!harness.path.exists(), "socket file should be unlinked");
}

#[test]
fn differential_update_for_one_cell() {
    let mut harness = Harness::listen("diff");
    let mut video = ScriptedVideo::text_80x25();
    let mut client = harness.handshaken_client();

    harness.stream.on_vsync(&video);
    client.read_frame(); // mode re-announcement
    client.read_frame(); // initial full frame

    video.put(2, 3, b'A', 0x1F);
    harness.stream.on_vsync(&video);
    let (channel, payload) = client.read_frame();
    assert_eq!(channel, 0x01);
    assert_eq!(payload, b"\x1b[3;4H\x1b[0;97;44mA");
}

#[test]
fn keyboard_frames_reach_the_sink() {
    let mut harness = Harness::listen("keys");
    let mut client = harness.handshaken_client();

    client.send_frame(0x02, b"\x1b[A");
    client.send_frame(0x02, b"a");
    client.send_frame(0x02, &[0x01]);
    client.send_frame(0x02, b"\x1b[20~");

    wait_until("keycodes", || harness.sink.keys().len() == 4);
    assert_eq!(
        harness.sink.keys(),
        vec![0x4800, 0x1E61, 0x1E01, 0x4300]
    );
}

#[test]
fn graphics_mode_pauses_text_output() {
    let mut harness = Harness::listen("modes");
    let mut video = ScriptedVideo::text_80x25();
    let mut client = harness.handshaken_client();

    harness.stream.on_vsync(&video);
    client.read_frame(); // mode re-announcement
    client.read_frame(); // initial full frame

    video.mode = VideoMode::Vga;
    harness.stream.on_vsync(&video);
    assert_eq!(client.read_frame(), (0x00, vec![0x12]));

    // Further graphics-mode ticks stream nothing.
    video.put(0, 0, b'X', 0x07);
    harness.stream.on_vsync(&video);
    harness.stream.on_vsync(&video);
    client.expect_silence(Duration::from_millis(200));

    // Returning to text mode re-announces and repaints in order.
    video.mode = VideoMode::Text;
    harness.stream.on_vsync(&video);
    assert_eq!(client.read_frame(), (0x00, MODE_TEXT_80X25.to_vec()));
    let (channel, payload) = client.read_frame();
    assert_eq!(channel, 0x01);
    assert!(payload.starts_with(FULL_REDRAW_PREFIX));
}

#[test]
fn refresh_request_forces_full_redraw() {
    let mut harness = Harness::listen("refresh");
    let video = ScriptedVideo::text_80x25();
    let mut client = harness.handshaken_client();

    harness.stream.on_vsync(&video);
    client.read_frame(); // mode re-announcement
    client.read_frame(); // initial full frame

    client.send_frame(0x00, &[0x20]);

    // The refresh lands on the reader worker; tick until the repaint shows up.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        assert!(Instant::now() < deadline, "no full redraw after refresh");
        std::thread::sleep(Duration::from_millis(20));
        harness.stream.on_vsync(&video);
        client.stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let mut header = [0u8; 4];
        match client.stream.read_exact(&mut header) {
            Ok(()) => {
                let len = ((header[1] as usize) << 16)
                    | ((header[2] as usize) << 8)
                    | header[3] as usize;
                let mut payload = vec![0u8; len];
                client
                    .stream
                    .set_read_timeout(Some(Duration::from_secs(2)))
                    .unwrap();
                client.stream.read_exact(&mut payload).unwrap();
                assert_eq!(header[0], 0x01);
                assert!(payload.starts_with(FULL_REDRAW_PREFIX));
                break;
            }
            Err(err)
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue;
            }
            Err(err) => panic!("read failed: {err}"),
        }
    }
}

#[test]
fn host_invalidate_forces_full_redraw() {
    let mut harness = Harness::listen("invalidate");
    let video = ScriptedVideo::text_80x25();
    let mut client = harness.handshaken_client();

    harness.stream.on_vsync(&video);
    client.read_frame(); // mode re-announcement
    client.read_frame(); // initial full frame

    harness.stream.invalidate();
    harness.stream.on_vsync(&video);
    let (channel, payload) = client.read_frame();
    assert_eq!(channel, 0x01);
    assert!(payload.starts_with(FULL_REDRAW_PREFIX));
}

#[test]
fn goodbye_resets_session_and_accepts_next_client() {
    let mut harness = Harness::listen("goodbye");
    let mut client = harness.handshaken_client();

    client.send_frame(0x00, &[0x02]);
    wait_until("disconnect", || !harness.stream.is_connected());
    assert!(!harness.stream.handshake_complete());
    assert!(client.at_eof());

    let mut next = Client::connect(&harness.path);
    assert_eq!(next.read_frame(), (0x00, SERVER_HELLO.to_vec()));
    next.send_hello();
    wait_until("second handshake", || harness.stream.handshake_complete());
    assert_eq!(next.read_frame(), (0x00, MODE_TEXT_80X25.to_vec()));
}

#[test]
fn junk_frames_do_not_kill_the_session() {
    let mut harness = Harness::listen("junk");
    let mut client = harness.handshaken_client();

    client.send_frame(0x00, &[0x21, 0x00, 0x84, 0x00, 0x28]); // resize 132x40
    client.send_frame(0x00, &[0x21]); // truncated resize
    client.send_frame(0x00, &[0x7E]); // unknown control
    client.send_frame(0x33, &[1, 2, 3]); // unknown channel
    client.send_frame(0x03, &[9, 9, 9]); // mouse stub
    client.send_frame(0x00, &[]); // empty control

    // The session is still alive and still forwards keys.
    client.send_frame(0x02, b"x");
    wait_until("keycode after junk", || !harness.sink.keys().is_empty());
    assert_eq!(harness.sink.keys(), vec![0x2D78]);
    assert!(harness.stream.is_connected());
}

#[test]
fn disabled_stream_ignores_ticks() {
    let mut harness = Harness::listen("disabled");
    let mut video = ScriptedVideo::text_80x25();
    let mut client = harness.handshaken_client();

    harness.stream.on_vsync(&video);
    client.read_frame(); // mode re-announcement
    client.read_frame(); // initial full frame

    harness.stream.set_enabled(false);
    assert!(!harness.stream.is_enabled());
    video.put(0, 0, b'Q', 0x07);
    harness.stream.on_vsync(&video);
    client.expect_silence(Duration::from_millis(200));

    harness.stream.set_enabled(true);
    harness.stream.on_vsync(&video);
    let (channel, payload) = client.read_frame();
    assert_eq!(channel, 0x01);
    assert_eq!(payload, b"\x1b[1;1HQ");
}

#[test]
fn bulk_path_is_accepted_but_never_bound() {
    let path = socket_path("bulk-primary");
    let bulk = socket_path("bulk-secondary");
    let sink = Arc::new(RecordingSink::default());
    let stream = TextStream::listen(
        StreamConfig {
            primary_path: path.clone(),
            bulk_path: Some(bulk.clone()),
        },
        Arc::clone(&sink) as Arc<dyn KeyboardSink>,
    )
    .expect("listen");

    assert!(path.exists());
    assert!(!bulk.exists());
    drop(stream);
    assert!(!path.exists());
}

#[test]
fn peer_disconnect_resets_and_relistens() {
    let mut harness = Harness::listen("drop");
    let client = harness.handshaken_client();
    drop(client);

    wait_until("disconnect", || !harness.stream.is_connected());

    let mut again = Client::connect(&harness.path);
    assert_eq!(again.read_frame(), (0x00, SERVER_HELLO.to_vec()));
}
