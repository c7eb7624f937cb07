//! Live operator console for fleet traffic.
//!
//! Operators connect over TCP and drive their session with newline-delimited
//! AT commands; the server answers and streams router events as one JSON
//! object per line.
//!
//! ## Session lifecycle
//!
//! - A connection starts unauthenticated with default display settings
//! - `AT+AUTH=<user>,<pass>` is the only command accepted until it succeeds
//! - Display commands (`AT+MODE`, `AT+FILTER`, ...) change only the issuing session
//! - `AT+CMDLOG` / `AT+ALARMLOG` flip the process-wide audit toggles
//! - On disconnect the broadcast subscription and settings are released
//!
//! ## Example
//!
//! ```text
//! > AT+AUTH=admin,admin123
//! {"type":"auth","success":true,"message":"Authentication successful"}
//! > AT+FILTER=esg-00*
//! {"type":"response","message":"Filter set to esg-00*"}
//! {"type":"mqtt_message","topic":"esagtech/pb/d/esg-0001/hb","direction":"in",...}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod command;
pub mod error;
pub mod render;
pub mod server;
pub mod session;
pub mod settings;

pub use buffer::{EventBuffer, BUFFER_REPLAY_LIMIT, DEFAULT_BUFFER_CAPACITY};
pub use command::{help_text, parse, AtCommand};
pub use error::ConsoleError;
pub use render::{hex_dump, render_event, EventFrame, Frame, HmacView, RawView, StatusFrame};
pub use server::{ConsoleServer, DEFAULT_OUTBOUND_QUEUE, MAX_LINE_LENGTH};
pub use session::{ConsoleContext, Credentials, Session, SessionView};
pub use settings::{DirectionFilter, DisplayMode, SessionSettings, Verbosity};
