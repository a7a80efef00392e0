// Terminal multiplexer core
//
// Tracks command-execution sessions (tabs), each with at most one foreground
// process, plus background processes reported by the backend. The core never
// talks to the network itself: outbound requests go to an `Outbox` and
// inbound messages are fed in through `Terminal::handle_inbound`.

pub mod ansi;
pub mod background;
mod error;
pub mod events;
pub mod history;
pub mod manager;
mod outbox;
pub mod output_buffer;
pub mod process;
pub mod session;
pub mod store;
mod terminal;

// Re-export public API
pub use background::{BackgroundMonitor, BackgroundOrigin, BackgroundProcess, OutputQuery};
pub use error::{Result, TerminalError};
pub use events::StateChange;
pub use history::{Direction, HistoryNavigator};
pub use manager::{InterruptOutcome, SessionManager};
pub use outbox::Outbox;
pub use output_buffer::{LineAssembler, OutputBuffer};
pub use process::{ProcessHandle, Transition};
pub use session::Session;
pub use store::{KeyValueStore, MemoryStore};
pub use terminal::{Terminal, TerminalConfig};
