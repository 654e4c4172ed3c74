pub mod agent;
pub mod connection;
pub mod event;
pub mod killswitch;
pub mod probe;
pub mod regime;
pub mod snapshot;

pub use agent::*;
pub use connection::*;
pub use event::*;
pub use killswitch::*;
pub use probe::*;
pub use regime::*;
pub use snapshot::*;
