//! Raw TCP traffic patterns

mod flood;

pub use flood::TcpFloodDriver;
