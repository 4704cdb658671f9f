//! Credential types for authentication.

use std::borrow::Cow;

/// Credentials for a server connection.
///
/// Credentials are designed to minimize copying of sensitive data.
#[derive(Clone)]
pub enum Credentials {
    /// User name and password, checked with SCRAM-SHA-256.
    Password {
        /// User name.
        user: Cow<'static, str>,
        /// Password.
        password: Cow<'static, str>,
    },

    /// User name and a secret key (bearer token) sent in the handshake.
    SecretKey {
        /// User name.
        user: Cow<'static, str>,
        /// Secret key.
        secret_key: Cow<'static, str>,
    },

    /// User name only, for servers configured with trust authentication.
    Trust {
        /// User name.
        user: Cow<'static, str>,
    },
}

impl Credentials {
    /// Password credentials.
    pub fn password(
        user: impl Into<Cow<'static, str>>,
        password: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::Password {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Secret key credentials.
    pub fn secret_key(
        user: impl Into<Cow<'static, str>>,
        secret_key: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::SecretKey {
            user: user.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Credentials without a secret.
    pub fn trust(user: impl Into<Cow<'static, str>>) -> Self {
        Self::Trust { user: user.into() }
    }

    /// The user name.
    #[must_use]
    pub fn user(&self) -> &str {
        match self {
            Self::Password { user, .. } | Self::SecretKey { user, .. } | Self::Trust { user } => user,
        }
    }

    /// The password, for SCRAM.
    #[must_use]
    pub fn password_str(&self) -> Option<&str> {
        match self {
            Self::Password { password, .. } => Some(password),
            _ => None,
        }
    }

    /// The secret key, sent as a handshake parameter.
    #[must_use]
    pub fn secret_key_str(&self) -> Option<&str> {
        match self {
            Self::SecretKey { secret_key, .. } => Some(secret_key),
            _ => None,
        }
    }

    /// Get the authentication method name.
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Password { .. } => "SCRAM-SHA-256",
            Self::SecretKey { .. } => "secret key",
            Self::Trust { .. } => "trust",
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::SecretKey { user, .. } => f
                .debug_struct("SecretKey")
                .field("user", user)
                .field("secret_key", &"[REDACTED]")
                .finish(),
            Self::Trust { user } => f.debug_struct("Trust").field("user", user).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::password("admin", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));

        let key = Credentials::secret_key("admin", "nbwt1_secret");
        assert!(!format!("{key:?}").contains("nbwt1_secret"));
    }

    #[test]
    fn test_accessors() {
        let creds = Credentials::password("edgedb", "pw");
        assert_eq!(creds.user(), "edgedb");
        assert_eq!(creds.password_str(), Some("pw"));
        assert_eq!(creds.secret_key_str(), None);
        assert_eq!(Credentials::trust("x").method_name(), "trust");
    }
}
