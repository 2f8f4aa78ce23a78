use serde::{Deserialize, Serialize};

/// Browser cookie as extracted from or restored into a session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Seconds since epoch; negative for session cookies.
    #[serde(default = "default_expires")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_same_site")]
    pub same_site: String,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_expires() -> f64 {
    -1.0
}

fn default_same_site() -> String {
    "Lax".to_string()
}

impl Cookie {
    /// Session cookies (`expires < 0`) never expire from the jar's point of
    /// view; everything else is compared against the supplied clock.
    pub fn is_expired(&self, now_epoch_secs: f64) -> bool {
        self.expires >= 0.0 && self.expires < now_epoch_secs
    }

    /// Registrable-domain match against a bare site label (`google`,
    /// `linkedin`, ...).
    pub fn matches_site(&self, site: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        domain == site
            || domain.starts_with(&format!("{site}."))
            || domain.contains(&format!(".{site}."))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StorageItem {
    pub name: String,
    pub value: String,
}

/// Local storage captured for a single origin.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OriginState {
    pub origin: String,
    #[serde(rename = "localStorage", default)]
    pub local_storage: Vec<StorageItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Browser environment captured alongside a storage-state snapshot so that a
/// resumed session can present the same fingerprint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvMetadata {
    pub user_agent: String,
    pub timezone: String,
    pub viewport: Viewport,
    #[serde(default)]
    pub languages: Vec<String>,
    pub device_pixel_ratio: f64,
}

/// Plaintext storage-state snapshot: the pair (cookies, per-origin local
/// storage) needed to resume an authenticated browser session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageStateBlob {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
    #[serde(rename = "__envMetadata", default, skip_serializing_if = "Option::is_none")]
    pub env_metadata: Option<EnvMetadata>,
}
