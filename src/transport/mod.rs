pub mod traits;
pub mod websocket;

pub use traits::{LinkConnector, TextLink};
pub use websocket::WsConnector;
