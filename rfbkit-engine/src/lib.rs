//! RFB session engine.
//!
//! [`Session::establish`] takes any byte-stream duplex (a TCP stream, a TLS
//! session, an in-process pipe), drives the RFB handshake over it, and spawns
//! the two per-connection tasks:
//!
//! - the **reader** owns the inbound half, the codec state, and the canvas
//!   lock; it decodes server messages in wire order and surfaces them as
//!   [`SessionEvent`]s
//! - the **writer** owns the outbound half behind a per-connection mutex and
//!   drains [`SessionCommand`]s, flushing each message atomically
//!
//! Both tasks observe the shared [`QuitSignal`]. Every error except the
//! application's own close is fatal: it is reported once on the event channel
//! and the session tears down. Connecting the underlying transport (and any
//! retry policy) belongs to the caller.
//!
//! ```no_run
//! use rfbkit_engine::{Session, SessionConfig, SessionEvent};
//! use tokio::io::{AsyncRead, AsyncWrite};
//!
//! # async fn example(stream: impl AsyncRead + AsyncWrite + Send + 'static) -> rfbkit_common::Result<()> {
//! let session = Session::establish(stream, SessionConfig::default()).await?;
//! while let Ok(event) = session.events().recv_async().await {
//!     match event {
//!         SessionEvent::FrameUpdated { damage } => {
//!             let canvas = session.canvas();
//!             let canvas = canvas.lock().await;
//!             // repaint the damaged regions from canvas.data()
//!             # let _ = (damage, canvas);
//!         }
//!         SessionEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod quit;
pub mod session;

pub use config::SessionConfig;
pub use events::{SessionCommand, SessionEvent};
pub use quit::QuitSignal;
pub use session::Session;
