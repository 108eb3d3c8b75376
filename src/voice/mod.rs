pub mod connector;
pub mod transport;

pub use connector::{VoiceConnector, VoiceError, VoiceSession};
pub use transport::{VoiceTransport, WireConnector};
