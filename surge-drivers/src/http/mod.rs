//! HTTP traffic patterns

mod bypass;
mod flood;
mod slowloris;

pub use bypass::HttpBypassDriver;
pub use flood::HttpFloodDriver;
pub use slowloris::HttpSlowlorisDriver;
