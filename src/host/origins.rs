use parking_lot::RwLock;
use std::collections::HashSet;
use url::Url;

/// The serialized origin of `url` as a browser computes it: lowercased
/// scheme and host, credentials and path dropped, default ports elided.
/// Opaque origins (`about:blank`, `data:`) and unparsable input have none.
pub fn origin_of(url: &str) -> Option<String> {
    let origin = Url::parse(url.trim()).ok()?.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization())
}

/// Origins allowed to use read-only actions.
#[derive(Debug, Default)]
pub struct OriginRegistry {
    enforce: bool,
    authorized: RwLock<HashSet<String>>,
}

impl OriginRegistry {
    pub fn new(enforce: bool, preauthorized: impl IntoIterator<Item = String>) -> Self {
        let authorized = preauthorized
            .into_iter()
            .map(|entry| origin_of(&entry).unwrap_or(entry))
            .collect();
        Self {
            enforce,
            authorized: RwLock::new(authorized),
        }
    }

    /// A registry that lets everything through.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn is_enforced(&self) -> bool {
        self.enforce
    }

    pub fn permits(&self, origin: Option<&str>) -> bool {
        if !self.enforce {
            return true;
        }
        origin.is_some_and(|origin| self.authorized.read().contains(origin))
    }

    pub fn authorize(&self, origin: &str) {
        if self.authorized.write().insert(origin.to_string()) {
            tracing::info!(origin, "origin authorized");
        }
    }

    pub fn revoke(&self, origin: &str) -> bool {
        self.authorized.write().remove(origin)
    }
}
