//! Application-wide settings.

use serde::Serialize;

/// Environment variable that selects [`Settings::env`].
pub const ENV_VAR: &str = "STRATA_ENV";

/// Global settings read by every exchange.
///
/// Only `env` and `subdomain_offset` are serialized; `silent` is an
/// operational switch, not part of the public dump.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Environment tag. `"test"` silences the default error listener.
    pub env: String,
    /// How many trailing host labels form the root domain when computing
    /// subdomains. `2` makes `tobi.ferrets.example.com` yield
    /// `["ferrets", "tobi"]`.
    pub subdomain_offset: usize,
    /// Disables the default error listener entirely.
    #[serde(skip)]
    pub silent: bool,
}

impl Settings {
    /// Reads `env` from `STRATA_ENV`, falling back to `"development"`.
    pub fn from_env() -> Self {
        let env = std::env::var(ENV_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "development".to_owned());
        Self { env, ..Self::default() }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: "development".to_owned(),
            subdomain_offset: 2,
            silent: false,
        }
    }
}
