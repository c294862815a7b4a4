use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::capture::{self, ModeClass, VideoMode, VideoSource};
use crate::input::{InputParser, KeyboardSink};
use crate::model::Screen;
use crate::protocol::wire::{self, TransportError};
use crate::protocol::{Channel, PROTOCOL_VERSION};
use crate::render::AnsiRenderer;
use crate::session::{self, Disposition, OutboundFrame, SessionState};

static RUNTIME: Lazy<Runtime> = Lazy::new(|| Runtime::new().expect("tokio runtime"));

/// Spawns onto the ambient runtime when the caller already lives in one,
/// otherwise onto the process-wide fallback runtime.
fn spawn_task<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future)
    } else {
        RUNTIME.spawn(future)
    }
}

fn enter_runtime<T>(f: impl FnOnce() -> T) -> T {
    if Handle::try_current().is_ok() {
        f()
    } else {
        let _guard = RUNTIME.enter();
        f()
    }
}

/// Ticks between scheduled full redraws, roughly two seconds at 60 Hz.
const RESYNC_INTERVAL: u64 = 120;

#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    /// Unix-domain socket path for the framed protocol.
    pub primary_path: PathBuf,
    /// Reserved for a future large-payload channel; accepted but never bound.
    pub bulk_path: Option<PathBuf>,
}

/// The streaming endpoint an emulator host owns. `listen` starts the reader
/// worker; the host then calls `on_vsync` once per display refresh from its
/// own thread. All client-facing I/O happens on background tasks.
pub struct TextStream {
    state: Arc<SessionState>,
    screen: Screen,
    renderer: AnsiRenderer,
    last_mode: Option<VideoMode>,
    vsync_count: u64,
    enabled: bool,
    worker: Option<JoinHandle<()>>,
    primary_path: PathBuf,
}

impl TextStream {
    /// Binds the socket (unlinking any stale file first) and starts the
    /// reader worker. Streaming is enabled on return.
    pub fn listen(
        config: StreamConfig,
        sink: Arc<dyn KeyboardSink>,
    ) -> Result<Self, TransportError> {
        let primary_path = config.primary_path.clone();
        let _ = fs::remove_file(&primary_path);

        let listener = enter_runtime(|| UnixListener::bind(&primary_path))
            .map_err(TransportError::Unavailable)?;
        if let Some(bulk) = &config.bulk_path {
            debug!(path = %bulk.display(), "bulk channel path reserved, not bound");
        }

        let state = Arc::new(SessionState::new());
        state.running.store(true, Ordering::SeqCst);
        let worker = spawn_task(run_worker(state.clone(), listener, sink));

        info!(
            path = %primary_path.display(),
            version_major = PROTOCOL_VERSION >> 8,
            version_minor = PROTOCOL_VERSION & 0xFF,
            "listening"
        );

        Ok(Self {
            state,
            screen: Screen::new(),
            renderer: AnsiRenderer::new(),
            last_mode: None,
            vsync_count: 0,
            enabled: true,
            worker: Some(worker),
            primary_path,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn handshake_complete(&self) -> bool {
        self.state.handshake_complete()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Schedules a full clear-and-repaint on the next tick.
    pub fn invalidate(&self) {
        self.state.set_force_redraw();
    }

    /// Snapshot, render, and send for one display refresh. Never blocks on
    /// I/O and never reports errors back to the caller; a lost client simply
    /// means the frames go nowhere.
    pub fn on_vsync(&mut self, source: &dyn VideoSource) {
        if !self.enabled {
            return;
        }

        let mode = source.mode();
        // Keep the cached classification fresh even before the handshake, so
        // the HELLO-triggered notification reports the live mode.
        self.state.set_mode_class(mode.class());

        if !self.state.is_connected() || !self.state.handshake_complete() {
            return;
        }

        self.vsync_count += 1;

        if self.last_mode != Some(mode) || !self.state.mode_notified() {
            self.last_mode = Some(mode);
            self.state.clear_mode_notified();
            session::send_mode_notification(&self.state);
            self.state.set_force_redraw();
        }

        if mode.class() == ModeClass::Text && self.state.wants_text() {
            if self.vsync_count % RESYNC_INTERVAL == 0 {
                self.state.set_force_redraw();
            }

            if capture::snapshot_text(source, &mut self.screen) {
                self.state
                    .set_dimensions(self.screen.cols() as u16, self.screen.rows() as u16);
                self.state.set_force_redraw();
                session::send_mode_notification(&self.state);
            }
            capture::snapshot_cursor(source, &mut self.screen);

            let full = self.state.take_force_redraw();
            let bytes = self.renderer.render(&self.screen, full);
            if !bytes.is_empty() {
                let payload = bytes.to_vec();
                self.state.send(Channel::TextOut, payload);
            }
            self.screen.commit();
        }
    }

    /// Stops the reader worker, closes the client, and unlinks the socket.
    pub fn close(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.state.running.store(false, Ordering::SeqCst);
        self.state.shutdown.notify_one();

        if let Some(worker) = self.worker.take() {
            if Handle::try_current().is_ok() {
                // Cannot block inside a runtime; the worker unwinds on the
                // shutdown notification regardless.
                worker.abort();
            } else {
                let _ = RUNTIME.block_on(async {
                    tokio::time::timeout(Duration::from_secs(1), worker).await
                });
            }
        }

        self.state.end_client();
        let _ = fs::remove_file(&self.primary_path);
        info!(path = %self.primary_path.display(), "closed");
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_worker(
    state: Arc<SessionState>,
    listener: UnixListener,
    sink: Arc<dyn KeyboardSink>,
) {
    while state.running.load(Ordering::SeqCst) {
        let stream = tokio::select! {
            _ = state.shutdown.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    sleep(Duration::from_millis(50)).await;
                    continue;
                }
            },
        };

        info!("client connected");
        serve_client(&state, &sink, stream).await;
        state.end_client();
        info!("client disconnected");
    }
    state.end_client();
    debug!("reader worker stopped");
}

/// Services one client: greets it, then reads and dispatches frames until the
/// peer goes away or shutdown is requested.
async fn serve_client(state: &Arc<SessionState>, sink: &Arc<dyn KeyboardSink>, stream: UnixStream) {
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    state.attach_writer(tx);
    state.begin_client();
    spawn_task(run_writer(writer, rx));

    session::send_hello(state);

    let mut parser = InputParser::new();
    loop {
        let frame = tokio::select! {
            _ = state.shutdown.notified() => return,
            frame = wire::read_frame(&mut reader) => frame,
        };
        match frame {
            Ok((channel, payload)) => {
                if dispatch(state, sink, &mut parser, channel, &payload) == Disposition::Disconnect
                {
                    return;
                }
            }
            Err(TransportError::PeerClosed) => return,
            Err(TransportError::Incomplete) => {
                warn!("connection closed mid-frame");
                return;
            }
            Err(err) => {
                warn!(error = %err, "read failed");
                return;
            }
        }
    }
}

fn dispatch(
    state: &SessionState,
    sink: &Arc<dyn KeyboardSink>,
    parser: &mut InputParser,
    channel: u8,
    payload: &[u8],
) -> Disposition {
    match Channel::from_u8(channel) {
        Some(Channel::Control) => session::handle_control(state, payload),
        Some(Channel::KeyboardIn) => {
            parser.feed(payload, sink.as_ref());
            Disposition::Continue
        }
        Some(Channel::MouseIn) => {
            trace!(len = payload.len(), "discarding mouse input");
            Disposition::Continue
        }
        Some(other) => {
            debug!(channel = other.as_u8(), "ignoring inbound frame on output channel");
            Disposition::Continue
        }
        None => {
            warn!(channel, "unknown channel");
            Disposition::Continue
        }
    }
}

async fn run_writer(mut writer: OwnedWriteHalf, mut frames: UnboundedReceiver<OutboundFrame>) {
    while let Some(frame) = frames.recv().await {
        let encoded = match wire::encode_frame(frame.channel, &frame.payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "dropping unencodable frame");
                continue;
            }
        };
        if let Err(err) = writer.write_all(&encoded).await {
            debug!(error = %err, "write failed, stopping writer");
            break;
        }
    }
}
