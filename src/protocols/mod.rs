pub mod http;
pub mod websocket;

pub use http::{DefaultStrategy, ForwardContext, ProxyStrategy, ServiceProxy};
pub use websocket::WebSocketRelay;
