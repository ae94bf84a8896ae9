//! Tenants: one connected Shopify store each.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// Store URL as registered, e.g. `acme.myshopify.com`.
    pub shopify_url: String,
}

/// Reduce a shop domain or URL to the bare shop handle used for matching.
///
/// `https://Acme.myshopify.com/` and `acme.myshopify.com` both become `acme`.
pub fn shop_handle(domain: &str) -> String {
    let d = domain.trim().to_ascii_lowercase();
    let d = d
        .strip_prefix("https://")
        .or_else(|| d.strip_prefix("http://"))
        .unwrap_or(d.as_str());
    let d = d.trim_end_matches('/');
    d.strip_suffix(".myshopify.com").unwrap_or(d).to_string()
}

impl Tenant {
    /// True when this tenant's store URL refers to the given shop domain.
    pub fn matches_shop_domain(&self, domain: &str) -> bool {
        let handle = shop_handle(domain);
        !handle.is_empty() && shop_handle(&self.shopify_url) == handle
    }
}
