use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Length of a public library token: 16 identifier bytes in unpadded base64.
pub const TOKEN_LENGTH: usize = 22;

const ID_BYTES: usize = 16;
const HEX_LENGTH: usize = 32;

/// Internal 128-bit identifier of a library.
///
/// Externally a library is only ever referenced by its public token, a
/// 22-character URL-safe base64 rendering of the raw bytes with padding
/// stripped (alphabet `[A-Za-z0-9_-]`). `token` and `from_token` are exact
/// inverses over all valid values, and `Display`/`Serialize` emit the token
/// so identifiers never leak in raw form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryId(Uuid);

impl LibraryId {
    /// Generates a fresh random identifier. Never reused.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The public, URL-safe token for this identifier.
    #[must_use]
    pub fn token(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    /// Decodes a public token back into the identifier.
    ///
    /// Fails with `MalformedToken` on wrong length, characters outside the
    /// URL-safe alphabet, or any input that does not decode to exactly 16
    /// bytes.
    pub fn from_token(token: &str) -> Result<Self> {
        if token.len() != TOKEN_LENGTH {
            return Err(Error::MalformedToken);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| Error::MalformedToken)?;
        Self::from_bytes(&bytes)
    }

    /// Normalizes any well-formed external reference into an identifier.
    ///
    /// Accepts the 22-character public token, the 32-character lowercase hex
    /// form used by text-keyed storage, or a hyphenated UUID. Callers at the
    /// service boundary pass tokens while internal plumbing may already hold
    /// a raw value; both funnel through here before any comparison.
    pub fn parse(input: &str) -> Result<Self> {
        if input.len() == TOKEN_LENGTH {
            return Self::from_token(input);
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|_| Error::MalformedToken)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        self.0.as_bytes()
    }

    /// Reconstructs an identifier from its raw 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; ID_BYTES] = bytes.try_into().map_err(|_| Error::MalformedToken)?;
        Ok(Self(Uuid::from_bytes(raw)))
    }

    /// The 32-character, zero-padded lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Reconstructs an identifier from its 32-character hex form.
    pub fn from_hex(input: &str) -> Result<Self> {
        if input.len() != HEX_LENGTH {
            return Err(Error::MalformedToken);
        }
        let bytes = hex::decode(input).map_err(|_| Error::MalformedToken)?;
        Self::from_bytes(&bytes)
    }
}

impl Default for LibraryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for LibraryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Uuid> for LibraryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Serialize for LibraryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.token())
    }
}

impl<'de> Deserialize<'de> for LibraryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
