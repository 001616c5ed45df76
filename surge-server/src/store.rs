//! Relay directory and identity pool store
//!
//! Holds the parsed directory behind `Arc` swaps: sessions snapshot the
//! current `Arc` at start and keep it for their whole lifetime, so a
//! replacement never disturbs a running worker. `replace` persists the
//! raw texts to disk first, then swaps the in-memory state.

use crate::config::ServerConfig;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use surge_core::relay::{parse_identity_list, parse_relay_list};
use surge_core::{IdentityPool, RelayDescriptor};
use surge_engine::RelaySource;
use tracing::{info, warn};

pub struct ConfigStore {
    relays_file: PathBuf,
    identities_file: PathBuf,
    relays: RwLock<Arc<Vec<RelayDescriptor>>>,
    identities: RwLock<Arc<IdentityPool>>,
    relays_text: RwLock<String>,
    identities_text: RwLock<String>,
}

impl ConfigStore {
    /// Load both files; a missing file is an empty directory, not an
    /// error.
    pub fn load(config: &ServerConfig) -> Self {
        let relays_text = read_or_empty(&config.relays_file);
        let identities_text = read_or_empty(&config.identities_file);
        let relays = parse_relay_list(&relays_text);
        let identities = parse_identity_list(&identities_text);

        info!(
            relays = relays.len(),
            identities = identities.len(),
            "Loaded relay directory"
        );

        Self {
            relays_file: config.relays_file.clone(),
            identities_file: config.identities_file.clone(),
            relays: RwLock::new(Arc::new(relays)),
            identities: RwLock::new(Arc::new(IdentityPool::new(identities))),
            relays_text: RwLock::new(relays_text),
            identities_text: RwLock::new(identities_text),
        }
    }

    pub fn relay_count(&self) -> usize {
        self.relays.read().len()
    }

    /// Raw file texts, as last loaded or replaced.
    pub fn raw_texts(&self) -> (String, String) {
        (
            self.relays_text.read().clone(),
            self.identities_text.read().clone(),
        )
    }

    /// Persist new directory texts and swap the parsed state. Running
    /// sessions keep their snapshot; only future starts see the change.
    pub fn replace(&self, relays_text: &str, identities_text: &str) -> std::io::Result<()> {
        if let Some(dir) = self.relays_file.parent() {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(dir) = self.identities_file.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.relays_file, relays_text)?;
        std::fs::write(&self.identities_file, identities_text)?;

        let relays = parse_relay_list(relays_text);
        let identities = parse_identity_list(identities_text);
        info!(
            relays = relays.len(),
            identities = identities.len(),
            "Replaced relay directory"
        );

        *self.relays.write() = Arc::new(relays);
        *self.identities.write() = Arc::new(IdentityPool::new(identities));
        *self.relays_text.write() = relays_text.to_string();
        *self.identities_text.write() = identities_text.to_string();
        Ok(())
    }
}

impl RelaySource for ConfigStore {
    fn relays(&self) -> Arc<Vec<RelayDescriptor>> {
        self.relays.read().clone()
    }

    fn identities(&self) -> Arc<IdentityPool> {
        self.identities.read().clone()
    }
}

fn read_or_empty(path: &std::path::Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Directory file unreadable, starting empty");
            String::new()
        }
    }
}
