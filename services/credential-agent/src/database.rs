//! MySQL connection target built from the published credential.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// Where the credential is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    /// Database user
    pub user: String,
    /// `host:port`
    pub addr: String,
    /// Schema name
    pub name: String,
}

impl Default for DatabaseTarget {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            addr: "mysql:3306".to_string(),
            name: "mysql".to_string(),
        }
    }
}

impl DatabaseTarget {
    /// Build the DSN for `password`.
    #[must_use]
    pub fn dsn(&self, password: SecretString) -> Dsn {
        Dsn {
            target: self.clone(),
            password,
        }
    }
}

/// A go-sql-driver style MySQL DSN, `user:password@tcp(addr)/name`.
///
/// `Debug` and `Display` mask the password; [`Dsn::expose`] is the only way
/// to get the connectable string.
#[derive(Clone)]
pub struct Dsn {
    target: DatabaseTarget,
    password: SecretString,
}

impl Dsn {
    /// Full DSN including the password.
    #[must_use]
    pub fn expose(&self) -> String {
        format!(
            "{}:{}@tcp({})/{}",
            self.target.user,
            self.password.expose_secret(),
            self.target.addr,
            self.target.name
        )
    }

    /// Target the DSN points at.
    #[must_use]
    pub const fn target(&self) -> &DatabaseTarget {
        &self.target
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:***@tcp({})/{}",
            self.target.user, self.target.addr, self.target.name
        )
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dsn").field(&self.to_string()).finish()
    }
}
