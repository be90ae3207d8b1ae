use secrecy::{ExposeSecret, SecretString};
use strum::{Display, EnumString};

/// Which authentication scheme a backend expects.
///
/// Marker enum (no data) -- the actual secrets live in [`Credentials`].
/// Useful for parsing `auth_mode` from configuration without carrying
/// secret material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AuthScheme {
    /// Unauthenticated backend (typical for LAN-only NVRs).
    None,
    /// HTTP Basic auth (reverse proxies in front of the NVR).
    Basic,
    /// `Authorization: Bearer` token (NVRs with built-in auth).
    Bearer,
}

/// Credentials forwarded to the recording backend on every request.
///
/// This crate never stores or looks up credentials; callers resolve them
/// (keyring, env, config) and hand them in.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    #[default]
    None,

    /// Username/password sent as `Authorization: Basic`.
    Basic {
        username: String,
        password: SecretString,
    },

    /// Token sent as `Authorization: Bearer`.
    Bearer { token: SecretString },
}

impl Credentials {
    /// The scheme these credentials authenticate with.
    pub fn scheme(&self) -> AuthScheme {
        match self {
            Self::None => AuthScheme::None,
            Self::Basic { .. } => AuthScheme::Basic,
            Self::Bearer { .. } => AuthScheme::Bearer,
        }
    }

    /// Apply the credentials to a request builder.
    ///
    /// reqwest marks the resulting `Authorization` header as sensitive,
    /// so it never shows up in debug output.
    pub fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::None => builder,
            Self::Basic { username, password } => {
                builder.basic_auth(username, Some(password.expose_secret()))
            }
            Self::Bearer { token } => builder.bearer_auth(token.expose_secret()),
        }
    }
}
