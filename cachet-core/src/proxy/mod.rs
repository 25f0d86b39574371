//! Proxy handlers
//!
//! - [`upgrade`] - duplex byte bridge for upgraded connections
//! - [`reverse`] - plain request forwarding
//! - [`webapp`] - picks one of the two per request

pub mod reverse;
pub mod upgrade;
pub mod utils;
pub mod webapp;

pub use reverse::ReverseProxy;
pub use upgrade::{bridge, Dialer, DuplexProxy, TcpDialer};
pub use utils::{is_upgrade, ProxyError, ProxyResult};
pub use webapp::WebAppProxy;
