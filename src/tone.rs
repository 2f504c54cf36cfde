//! Announcement tone selection.
//!
//! The orchestrator only ever names a [`ToneKind`]; the table maps it to an
//! opaque locator the tone reader understands.

use crate::config::TonesConfig;
use serde::Serialize;
use std::fmt;

/// Which announcement to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneKind {
    Connected,
    Disconnected,
    ReadyToConnect,
}

impl ToneKind {
    pub const ALL: [ToneKind; 3] = [
        ToneKind::Connected,
        ToneKind::Disconnected,
        ToneKind::ReadyToConnect,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToneKind::Connected => "connected",
            ToneKind::Disconnected => "disconnected",
            ToneKind::ReadyToConnect => "ready_to_connect",
        }
    }
}

impl fmt::Display for ToneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps each [`ToneKind`] to its source locator.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneTable {
    connected: String,
    disconnected: String,
    ready_to_connect: String,
}

impl ToneTable {
    pub fn new(connected: &str, disconnected: &str, ready_to_connect: &str) -> Self {
        Self {
            connected: connected.to_string(),
            disconnected: disconnected.to_string(),
            ready_to_connect: ready_to_connect.to_string(),
        }
    }

    pub fn from_config(config: &TonesConfig) -> Self {
        Self::new(
            &config.connected,
            &config.disconnected,
            &config.ready_to_connect,
        )
    }

    pub fn locator(&self, kind: ToneKind) -> &str {
        match kind {
            ToneKind::Connected => &self.connected,
            ToneKind::Disconnected => &self.disconnected,
            ToneKind::ReadyToConnect => &self.ready_to_connect,
        }
    }

    /// Entries in table order.
    pub fn entries(&self) -> impl Iterator<Item = (ToneKind, &str)> {
        ToneKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.locator(kind)))
    }
}

impl Default for ToneTable {
    fn default() -> Self {
        Self::from_config(&TonesConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults;

    #[test]
    fn test_default_table_uses_flash_locators() {
        let table = ToneTable::default();
        assert_eq!(
            table.locator(ToneKind::Connected),
            defaults::TONE_CONNECTED
        );
        assert_eq!(
            table.locator(ToneKind::Disconnected),
            defaults::TONE_DISCONNECTED
        );
        assert_eq!(
            table.locator(ToneKind::ReadyToConnect),
            defaults::TONE_READY_TO_CONNECT
        );
    }

    #[test]
    fn test_entries_cover_every_kind_once() {
        let table = ToneTable::new("a", "b", "c");
        let entries: Vec<_> = table.entries().collect();
        assert_eq!(
            entries,
            vec![
                (ToneKind::Connected, "a"),
                (ToneKind::Disconnected, "b"),
                (ToneKind::ReadyToConnect, "c"),
            ]
        );
    }

    #[test]
    fn test_kind_display_is_snake_case() {
        assert_eq!(ToneKind::ReadyToConnect.to_string(), "ready_to_connect");
    }
}
