use std::collections::BTreeMap;

use vstream_core_types::StorageStateBlob;

use crate::model::RecordStatus;

/// Static allowlist of sites eligible for auto-verification, with the cookie
/// names that must be present (and unexpired) for the site to count as
/// logged in.
pub const VERIFIED_SITES: &[(&str, &[&str])] = &[
    ("google", &["SID", "SIDCC", "OSID"]),
    ("linkedin", &["li_at"]),
    ("instagram", &["sessionid"]),
    ("facebook", &["c_user", "xs"]),
    ("tiktok", &["sessionid"]),
];

pub fn required_cookies(site: &str) -> Option<&'static [&'static str]> {
    VERIFIED_SITES
        .iter()
        .find(|(name, _)| *name == site)
        .map(|(_, cookies)| *cookies)
}

/// Check each allowlisted site against the blob's cookie jar. Sites with no
/// matching cookies stay `false`; the map always contains every site.
pub fn verify_sites(blob: &StorageStateBlob, now_epoch_secs: f64) -> BTreeMap<String, bool> {
    let mut verified = BTreeMap::new();
    for (site, required) in VERIFIED_SITES {
        let ok = required.iter().all(|name| {
            blob.cookies.iter().any(|cookie| {
                cookie.name == *name
                    && cookie.matches_site(site)
                    && !cookie.is_expired(now_epoch_secs)
            })
        });
        verified.insert((*site).to_string(), ok);
    }
    verified
}

/// Status derived from a verification map: verified iff at least one site is.
pub fn status_for(verified: &BTreeMap<String, bool>) -> RecordStatus {
    if verified.values().any(|ok| *ok) {
        RecordStatus::Verified
    } else {
        RecordStatus::Pending
    }
}
