//! Session establishment and the per-connection reader/writer tasks.

use crate::config::SessionConfig;
use crate::events::{SessionCommand, SessionEvent};
use crate::quit::QuitSignal;
use rfbkit_codecs::{CodecRegistry, DecodeContext, PseudoEvent};
use rfbkit_common::{Rect, Result, RfbError};
use rfbkit_pixels::{Canvas, Colormap, PixelFormat};
use rfbkit_wire::handshake::{negotiate_security, negotiate_version, ProtocolVersion};
use rfbkit_wire::messages::client::{
    ClientCutText, ClientInit, FramebufferUpdateRequest, KeyEvent, PointerEvent, SetEncodings,
    SetPixelFormat,
};
use rfbkit_wire::messages::server::{ServerInit, ServerMessage};
use rfbkit_wire::messages::Rectangle;
use rfbkit_wire::{WireReader, WireWriter};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Shared handle to the session canvas.
///
/// The reader task holds the lock for the whole of every framebuffer update,
/// so locking from the application always observes a complete frame.
pub type CanvasHandle = Arc<Mutex<Canvas>>;

/// A running RFB client session.
///
/// Created by [`Session::establish`]; interact through the event receiver and
/// [`send`](Session::send). Dropping the session does not tear the connection
/// down by itself; call [`close`](Session::close) for a clean shutdown.
pub struct Session {
    events: flume::Receiver<SessionEvent>,
    commands: flume::Sender<SessionCommand>,
    canvas: CanvasHandle,
    quit: Arc<QuitSignal>,
    version: ProtocolVersion,
    name: Vec<u8>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Perform the RFB handshake over `stream` and start the session tasks.
    ///
    /// The stream is any byte-oriented duplex; dialing, TLS, and timeouts are
    /// the caller's concern. After ServerInit the session advertises the
    /// configured encodings and pixel format and requests the first full
    /// update.
    pub async fn establish<S>(stream: S, config: SessionConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = WireReader::new(read_half);
        let mut writer = WireWriter::new(write_half);

        let version = negotiate_version(&mut reader, &mut writer).await?;
        negotiate_security(
            &mut reader,
            &mut writer,
            version,
            &config.security,
            config.password.as_deref(),
        )
        .await?;

        ClientInit {
            shared: config.shared,
        }
        .write_to(&mut writer);
        writer.flush().await?;

        let server_init = ServerInit::read_from(&mut reader).await?;
        tracing::info!(
            name = %server_init.name_lossy(),
            width = server_init.width,
            height = server_init.height,
            version = version.as_str(),
            "session established"
        );

        // Advertise what we can decode, then switch formats if asked, then
        // ask for the first full frame; one atomic flush.
        SetEncodings {
            encodings: config.encodings.clone(),
        }
        .write_to(&mut writer);
        if let Some(format) = config.preferred_format {
            SetPixelFormat { format }.write_to(&mut writer);
        }
        FramebufferUpdateRequest {
            incremental: false,
            x: 0,
            y: 0,
            width: server_init.width,
            height: server_init.height,
        }
        .write_to(&mut writer);
        writer.flush().await?;

        let format = config.preferred_format.unwrap_or(server_init.format);
        let canvas: CanvasHandle = Arc::new(Mutex::new(Canvas::new(
            server_init.width as u32,
            server_init.height as u32,
        )));
        let quit = Arc::new(QuitSignal::new());
        let (event_tx, event_rx) = flume::bounded(64);
        let (command_tx, command_rx) = flume::bounded(32);

        let _ = event_tx.send(SessionEvent::Connected {
            width: server_init.width,
            height: server_init.height,
            name: server_init.name.clone(),
            format,
        });

        let outbound = Outbound::new(writer);

        let reader_task = ReaderTask {
            reader,
            canvas: canvas.clone(),
            registry: CodecRegistry::with_encodings(&config.encodings),
            format,
            colormap: Colormap::new(),
            fb_size: (server_init.width, server_init.height),
            outbound: outbound.clone(),
            events: event_tx.clone(),
            quit: quit.clone(),
        };
        let writer_task = WriterTask {
            outbound,
            canvas: canvas.clone(),
            commands: command_rx,
            events: event_tx,
            quit: quit.clone(),
        };

        let tasks = vec![
            tokio::spawn(reader_task.run()),
            tokio::spawn(writer_task.run()),
        ];

        Ok(Self {
            events: event_rx,
            commands: command_tx,
            canvas,
            quit,
            version,
            name: server_init.name,
            tasks,
        })
    }

    /// The event channel, delivering server activity in wire order.
    pub fn events(&self) -> &flume::Receiver<SessionEvent> {
        &self.events
    }

    /// Queue a command for the writer task.
    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RfbError::SinkCancelled)
    }

    /// The shared canvas handle.
    pub fn canvas(&self) -> CanvasHandle {
        self.canvas.clone()
    }

    /// Close the session cleanly (the sink-cancelled path).
    pub fn close(&self) {
        if self.send(SessionCommand::Close).is_err() {
            self.quit.raise();
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Desktop name bytes from ServerInit.
    pub fn desktop_name(&self) -> &[u8] {
        &self.name
    }

    /// Wait for both session tasks to finish.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// The outbound half behind the per-connection write mutex.
///
/// Each `send` locks, serializes one message, and flushes, so concurrent
/// writers can never interleave partial messages.
struct Outbound<W> {
    writer: Arc<Mutex<WireWriter<W>>>,
}

impl<W> Clone for Outbound<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin> Outbound<W> {
    fn new(writer: WireWriter<W>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    async fn send(&self, serialize: impl FnOnce(&mut WireWriter<W>)) -> Result<()> {
        let mut writer = self.writer.lock().await;
        serialize(&mut writer);
        writer.flush().await?;
        Ok(())
    }
}

/// The inbound task: owns the read half, the codec state, the colormap, and
/// the canvas writes.
struct ReaderTask<R, W> {
    reader: WireReader<R>,
    canvas: CanvasHandle,
    registry: CodecRegistry,
    format: PixelFormat,
    colormap: Colormap,
    fb_size: (u16, u16),
    outbound: Outbound<W>,
    events: flume::Sender<SessionEvent>,
    quit: Arc<QuitSignal>,
}

impl<R, W> ReaderTask<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn run(mut self) {
        loop {
            let message = tokio::select! {
                _ = self.quit.wait() => break,
                message = ServerMessage::read_from(&mut self.reader) => message,
            };
            let result = match message {
                Ok(message) => self.handle(message).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                self.fail(err);
                break;
            }
        }
    }

    /// Report a fatal error exactly once, then tear down.
    fn fail(&self, err: RfbError) {
        if self.quit.raise() {
            tracing::error!(error = %err, "session failed");
            let _ = self.events.send(SessionEvent::Error {
                message: err.to_string(),
            });
            let _ = self.events.send(SessionEvent::Closed);
        }
    }

    async fn handle(&mut self, message: ServerMessage) -> Result<()> {
        match message {
            ServerMessage::FramebufferUpdate { rect_count } => {
                let (damage, out_of_band) = self.apply_update(rect_count).await?;
                for event in out_of_band {
                    let _ = self.events.send(event);
                }
                let _ = self.events.send(SessionEvent::FrameUpdated { damage });
                // Keep updates flowing: pipeline the next incremental request.
                let (width, height) = self.fb_size;
                self.outbound
                    .send(|writer| {
                        FramebufferUpdateRequest {
                            incremental: true,
                            x: 0,
                            y: 0,
                            width,
                            height,
                        }
                        .write_to(writer)
                    })
                    .await
            }
            ServerMessage::SetColorMapEntries(msg) => {
                self.colormap.set_entries(msg.first_color, &msg.colors);
                let _ = self.events.send(SessionEvent::ColormapChanged {
                    first_color: msg.first_color,
                    count: msg.colors.len() as u16,
                });
                Ok(())
            }
            ServerMessage::Bell => {
                let _ = self.events.send(SessionEvent::Bell);
                Ok(())
            }
            ServerMessage::ServerCutText(msg) => {
                let _ = self.events.send(SessionEvent::CutText(msg.text));
                Ok(())
            }
        }
    }

    /// Apply every rectangle of one update under a single canvas lock, so
    /// the application can never observe a partial frame.
    async fn apply_update(
        &mut self,
        rect_count: u16,
    ) -> Result<(Vec<Rect>, Vec<SessionEvent>)> {
        let mut damage = Vec::with_capacity(rect_count as usize);
        let mut out_of_band = Vec::new();

        let canvas = self.canvas.clone();
        let mut canvas = canvas.lock().await;

        for _ in 0..rect_count {
            let rect = Rectangle::read_from(&mut self.reader).await?;
            let mut ctx = DecodeContext {
                format: &self.format,
                colormap: &self.colormap,
                canvas: &mut canvas,
            };
            match self.registry.decode(&mut self.reader, &rect, &mut ctx).await? {
                Some(PseudoEvent::DesktopResized { width, height }) => {
                    self.fb_size = (width, height);
                    out_of_band.push(SessionEvent::DesktopResized { width, height });
                }
                Some(PseudoEvent::CursorShape(shape)) => {
                    out_of_band.push(SessionEvent::CursorShape(shape));
                }
                Some(PseudoEvent::CursorMoved { x, y }) => {
                    out_of_band.push(SessionEvent::CursorMoved { x, y });
                }
                None => {
                    if !rect.is_pseudo() {
                        damage.push(Rect::new(
                            rect.x as i32,
                            rect.y as i32,
                            rect.width as u32,
                            rect.height as u32,
                        ));
                    }
                }
            }
        }

        Ok((damage, out_of_band))
    }
}

/// The outbound task: drains application commands and serializes them
/// through the write mutex.
struct WriterTask<W> {
    outbound: Outbound<W>,
    canvas: CanvasHandle,
    commands: flume::Receiver<SessionCommand>,
    events: flume::Sender<SessionEvent>,
    quit: Arc<QuitSignal>,
}

impl<W: AsyncWrite + Unpin + Send> WriterTask<W> {
    async fn run(self) {
        loop {
            let command = tokio::select! {
                _ = self.quit.wait() => break,
                command = self.commands.recv_async() => command,
            };
            match command {
                // A dropped command channel means the application is gone;
                // treat it like an explicit close.
                Ok(SessionCommand::Close) | Err(_) => {
                    if self.quit.raise() {
                        let _ = self.events.send(SessionEvent::Closed);
                    }
                    break;
                }
                Ok(command) => {
                    if let Err(err) = self.dispatch(command).await {
                        if self.quit.raise() {
                            let _ = self.events.send(SessionEvent::Error {
                                message: err.to_string(),
                            });
                            let _ = self.events.send(SessionEvent::Closed);
                        }
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::RequestUpdate { incremental, area } => {
                let (x, y, width, height) = match area {
                    Some(area) => (
                        area.x as u16,
                        area.y as u16,
                        area.width as u16,
                        area.height as u16,
                    ),
                    None => {
                        let canvas = self.canvas.lock().await;
                        let (w, h) = canvas.dimensions();
                        (0, 0, w as u16, h as u16)
                    }
                };
                self.outbound
                    .send(|writer| {
                        FramebufferUpdateRequest {
                            incremental,
                            x,
                            y,
                            width,
                            height,
                        }
                        .write_to(writer)
                    })
                    .await
            }
            SessionCommand::Pointer { x, y, buttons } => {
                self.outbound
                    .send(|writer| PointerEvent { buttons, x, y }.write_to(writer))
                    .await
            }
            SessionCommand::Key { keysym, down } => {
                self.outbound
                    .send(|writer| KeyEvent { down, keysym }.write_to(writer))
                    .await
            }
            SessionCommand::CutText(text) => {
                self.outbound
                    .send(|writer| ClientCutText { text }.write_to(writer))
                    .await
            }
            // Close never reaches here; the run loop intercepts it.
            SessionCommand::Close => Ok(()),
        }
    }
}
