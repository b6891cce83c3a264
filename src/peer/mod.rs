pub mod codec;
pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod mock;
pub mod transport;
pub mod types;

pub use connection::WebRtcTransport;
pub use mock::{MockNetwork, MockTransport};
pub use transport::{Connection, DataChannel, Transport, TransportEvent};
pub use types::{Descriptor, DescriptorKind, Role, ServerConfig, ServerKind, SessionState};
