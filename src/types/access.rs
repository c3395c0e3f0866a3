use std::fmt;

use serde::{Deserialize, Serialize};

/// The four independent capability flags a permission row carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFlags {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub owner: bool,
}

impl AccessFlags {
    /// Flags given to a library's creator: owner with full access.
    #[must_use]
    pub const fn owner() -> Self {
        Self {
            read: true,
            write: true,
            admin: true,
            owner: true,
        }
    }

    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            admin: false,
            owner: false,
        }
    }

    #[must_use]
    pub const fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            admin: false,
            owner: false,
        }
    }

    /// Returns true if any capability is granted.
    #[must_use]
    pub const fn any(self) -> bool {
        self.read || self.write || self.admin || self.owner
    }

    /// Returns a slice of capability names for these flags.
    #[must_use]
    pub fn to_strings(self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.read {
            flags.push("read");
        }
        if self.write {
            flags.push("write");
        }
        if self.admin {
            flags.push("admin");
        }
        if self.owner {
            flags.push("owner");
        }
        flags
    }
}

impl fmt::Display for AccessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_strings().join(", "))
    }
}
