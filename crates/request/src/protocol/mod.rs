//! Core types shared by the engine, the transports and the codec.
//!
//! - **Errors** (`error`): [`RequestError`] for controller operations with its
//!   [`ErrorKind`] taxonomy, [`TransportError`] for driver failures and
//!   [`ParseError`] for response decoding.
//! - **Lifecycle** (`state`): [`EngineState`], the typed view of the signal
//!   register, and the transition rules between request states.
//! - **Messages** (`message`): response head and body items produced by the
//!   decoder.

mod error;
pub use error::ErrorKind;
pub use error::ParseError;
pub use error::RequestError;
pub use error::SizeLimitExceeded;
pub use error::TransportError;

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;
pub use message::ResponseHead;

pub(crate) mod state;
pub use state::EngineState;
