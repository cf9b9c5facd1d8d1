//! Config Entries
//!
//! A config entry is one authenticated Bold account. Its `data` map holds
//! the credential (session token or OAuth token), and the manager drives
//! the entry through setup, retry and unload.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single account configuration
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`EntrySetup`] - Hook the integration implements for setup/unload
//!
//! # Storage
//!
//! Entries are persisted in `.storage/bold.config_entries`.

pub mod entry;
pub mod manager;
pub mod state_machine;

pub use entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult,
    ConfigEntryUpdatedData, EntrySetup, SetupError,
};
pub use state_machine::{calculate_retry_delay, InvalidTransition};
