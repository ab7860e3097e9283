//! Order-status notification dispatch engine.
//!
//! Request handlers compose and enqueue `SendTask`s without blocking; a single
//! `SessionManager` consumer drains them one at a time through the automation
//! surface, reconnecting with bounded retries when the session breaks.

mod composer;
mod dialing;
mod dispatcher;
mod engine;
mod error;
mod protocol;
mod queue;
mod surface;
mod types;

pub use composer::{
    CUSTOMER_PLACEHOLDER, Composer, DEFAULT_FALLBACK_TEMPLATE, PhraseMatrix,
};
pub use dialing::DialPlan;
pub use dispatcher::NotificationDispatcher;
pub use engine::{EngineSettings, EngineState, EngineStatus, SessionManager};
pub use error::{DispatchError, Result, SessionFault, SurfaceError, SurfaceResult};
pub use protocol::{CommitStrategy, CommitVia, ProtocolTimings, SendOutcome, SendProtocol, deep_link};
pub use queue::DispatchQueue;
pub use surface::{CommitKey, LaunchOptions, SurfaceLauncher, SurfacePage};
pub use types::{Recipient, SendTask, TaskId, TaskReceipt};
