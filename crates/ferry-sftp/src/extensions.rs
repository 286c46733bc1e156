//! Server extension negotiation
//!
//! The VERSION reply lists name/value pairs. Only the exact combinations in
//! [`KNOWN_EXTENSIONS`] enable a capability; anything else is logged and
//! ignored.

use tracing::debug;

use crate::protocol::{EXT_FSTATVFS, EXT_POSIX_RENAME, EXT_STATVFS};

/// Recognized extension name, required version string and capability bit
pub const KNOWN_EXTENSIONS: [(&str, &str, u32); 3] = [
    (EXT_POSIX_RENAME, "1", Extensions::POSIX_RENAME),
    (EXT_STATVFS, "2", Extensions::STATVFS),
    (EXT_FSTATVFS, "2", Extensions::FSTATVFS),
];

/// Capabilities advertised by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extensions(pub u32);

impl Extensions {
    /// `posix-rename@openssh.com` revision 1
    pub const POSIX_RENAME: u32 = 0x00000001;
    /// `statvfs@openssh.com` revision 2
    pub const STATVFS: u32 = 0x00000002;
    /// `fstatvfs@openssh.com` revision 2
    pub const FSTATVFS: u32 = 0x00000004;

    /// Build the capability set from the pairs sent in VERSION
    pub fn negotiate<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut bits = 0u32;

        for (name, value) in pairs {
            let known = KNOWN_EXTENSIONS
                .iter()
                .find(|(known_name, known_value, _)| *known_name == name && *known_value == value);

            match known {
                Some((_, _, bit)) => {
                    bits |= bit;
                    debug!("Server supports extension \"{}\" revision {}", name, value);
                }
                None => {
                    debug!("Unrecognised server extension \"{}\" revision {}", name, value);
                }
            }
        }

        Self(bits)
    }

    /// Check that every bit in `bit` is set
    pub fn contains(&self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    /// Atomic overwriting rename available
    pub fn has_posix_rename(&self) -> bool {
        self.contains(Self::POSIX_RENAME)
    }

    /// `statvfs` available
    pub fn has_statvfs(&self) -> bool {
        self.contains(Self::STATVFS)
    }

    /// `fstatvfs` available
    pub fn has_fstatvfs(&self) -> bool {
        self.contains(Self::FSTATVFS)
    }
}
