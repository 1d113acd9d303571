use std::fmt;

use secrecy::{ExposeSecret, Secret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A [`SecretString`] that can round-trip through configuration files.
///
/// [`secrecy`] deliberately refuses to serialize plain secret strings, but configuration
/// snapshots handed to child processes need the value. Debug output stays redacted.
#[derive(Clone)]
pub struct SerializableSecretString(SecretString);

impl SerializableSecretString {
    pub fn new(value: String) -> Self {
        Self(Secret::new(value))
    }
}

impl ExposeSecret<String> for SerializableSecretString {
    fn expose_secret(&self) -> &String {
        self.0.expose_secret()
    }
}

impl From<String> for SerializableSecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for SerializableSecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SerializableSecretString([REDACTED])")
    }
}

impl Serialize for SerializableSecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.expose_secret())
    }
}

impl<'de> Deserialize<'de> for SerializableSecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}
