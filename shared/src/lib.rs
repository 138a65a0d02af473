pub mod errors;
pub mod hash;
pub mod interval;
pub mod log;
pub mod proto;
pub mod stream;

pub use errors::{IntervalError, ProtocolError, StreamError, StreamResult};
pub use hash::hash;
pub use interval::{generate_intervals, Interval};
pub use proto::{Message, MsgType, Role};
pub use stream::{connect, connect_miner, MiningConn};
