//! Engine gateway: lifecycle, request/response correlation and timeouts for
//! the single render engine.

pub mod error;
pub mod gateway;
pub mod port;
pub mod protocol;
pub mod transport;

pub use error::{EngineError, ProtocolError, TransportError};
pub use gateway::{EngineGateway, GatewayConfig};
pub use port::{RenderEngine, wait_until_idle};
pub use protocol::{InboundMessage, OutboundMessage, RenderPayload, decode_inbound, encode_outbound};
pub use transport::{ChannelTransport, EngineEndpoint, EngineTransport, InboundReceiver};
