use serde::Deserialize;
use url::Url;

/// Upstream registries the proxy forwards to. Only the origin of each URL
/// is used; any path is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistriesConfig {
    #[serde(default = "default_npm_url", with = "serde_url")]
    pub npm: Url,
    #[serde(default = "default_jsr_url", with = "serde_url")]
    pub jsr: Url,
}

impl Default for RegistriesConfig {
    fn default() -> Self {
        Self {
            npm: default_npm_url(),
            jsr: default_jsr_url(),
        }
    }
}

/// `scheme://host[:port]` without a trailing slash.
pub fn origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn default_npm_url() -> Url {
    Url::parse("https://registry.npmjs.org").expect("static npm registry url")
}

fn default_jsr_url() -> Url {
    Url::parse("https://jsr.io").expect("static jsr registry url")
}

mod serde_url {
    use serde::{Deserialize, Deserializer};
    use url::Url;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Url, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Url::parse(&s).map_err(serde::de::Error::custom)
    }
}

pub(super) mod serde_url_opt {
    use serde::{Deserialize, Deserializer};
    use url::Url;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Url>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| Url::parse(&s))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
