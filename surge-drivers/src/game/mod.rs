//! Game-protocol traffic patterns

mod minecraft;

pub use minecraft::MinecraftPingDriver;
