// ABOUTME: Named MySQL connection profiles and lookup by connection name
// ABOUTME: A missing profile is an explicit error, never an empty profile

use std::fmt;

use crate::error::ArchiverError;

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    profiles: Vec<ConnectionProfile>,
}

impl ConnectionRegistry {
    pub fn new(profiles: Vec<ConnectionProfile>) -> Self {
        Self { profiles }
    }

    /// Look up a profile by its connection name.
    pub fn resolve(&self, name: &str) -> Result<&ConnectionProfile, ArchiverError> {
        self.profiles
            .iter()
            .find(|profile| profile.name == name)
            .ok_or_else(|| ArchiverError::ConnectionNotFound(name.to_string()))
    }
}
