//! Connection parameters and client flags forwarded to the native connect.

use std::ops::{BitOr, BitOrAssign};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Arguments of a native connect call.
///
/// Every field is optional; the native client substitutes its own defaults
/// (local socket, current user, no database) for anything left unset.
///
/// The password is a [`SecretString`]: it is redacted from `Debug` output and
/// never serialized. A [`Driver`](super::Driver) reads it with
/// [`ExposeSecret::expose_secret`](secrecy::ExposeSecret::expose_secret) at
/// the point it hands it to the native client.
///
/// # Examples
///
/// ```
/// use connq::ConnectParams;
///
/// let params = ConnectParams::new()
///     .host("db.internal")
///     .user("app")
///     .password("s3cret")
///     .database("orders")
///     .port(3306);
///
/// assert!(!params.is_empty());
/// assert!(!format!("{params:?}").contains("s3cret"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectParams {
    pub host: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<SecretString>,
    pub database: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<String>,
}

impl ConnectParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    /// Returns `true` if no parameter is set.
    ///
    /// Asynchronous constructors skip the connection attempt entirely for an
    /// empty parameter set.
    pub fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.user.is_none()
            && self.password.is_none()
            && self.database.is_none()
            && self.port.is_none()
            && self.socket.is_none()
    }
}

/// Client capability bitmask passed to the asynchronous native connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectFlags(u64);

impl ConnectFlags {
    pub const EMPTY: Self = Self(0);
    pub const COMPRESS: Self = Self(1 << 5);
    pub const INTERACTIVE: Self = Self(1 << 10);
    pub const MULTI_STATEMENTS: Self = Self(1 << 16);
    pub const MULTI_RESULTS: Self = Self(1 << 17);

    /// Wraps a raw bitmask.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ConnectFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConnectFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
