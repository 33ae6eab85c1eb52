//! Browser automation module
//!
//! This module attaches to a running browser through ChromiumOxide and
//! provides the page-level operations used by capture and replay.

pub mod connection;
pub mod overlay;
pub mod page;

pub use connection::{BrowserConnection, ConnectionConfig, ConnectionConfigBuilder};
pub use overlay::{OverlayScript, OVERLAY_ELEMENT_ID};
pub use page::CdpTarget;
