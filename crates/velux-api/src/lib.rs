// velux-api: Async Rust client for the Velux ACTIVE (Netatmo) cloud API

pub mod auth;
pub mod client;
pub mod error;
pub mod home;
pub mod models;
pub mod transport;

pub use auth::Identity;
pub use client::{DEFAULT_BASE_URL, VeluxClient};
pub use error::Error;
pub use models::{
    RawHome, RawModuleName, RawModuleStatus, RawRoomName, RawRoomStatus, RawStatus, TokenResponse,
};
pub use transport::TransportConfig;
