//! Configuration Module
//!
//! Configuration loading for the Sh server.

mod settings;

pub use settings::{
    ConfigError, EventLoopSettings, NotificationSettings, ServerConfig, ServerSettings,
};
