//! Client side of the vendor cloud: credential handling, the device registry
//! and the realtime websocket feed.

mod auth;
mod devices;
mod error;
mod labs;
mod realtime;
mod session;
mod stream;

pub use devices::{Device, DeviceDetails};
pub use error::SenseError;
pub use labs::LabsReport;
pub use realtime::RealtimeSample;
pub use session::SenseSession;
pub use stream::RealtimeStream;
