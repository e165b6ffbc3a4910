//! Maps inbound paths onto upstream registries.

const NPM_PREFIX: &str = "/npm/";
const JSR_PREFIX: &str = "/jsr/";
const NPM_SECURITY_PREFIX: &str = "-/npm/v1/security/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Npm,
    Jsr,
}

impl Namespace {
    /// Path segment the namespace is mounted under, without slashes.
    pub fn mount(self) -> &'static str {
        match self {
            Namespace::Npm => "npm",
            Namespace::Jsr => "jsr",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mount())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// Proxied to the namespace's registry; `rest` follows the prefix.
    Registry { namespace: Namespace, rest: &'a str },
    /// npm security advisory endpoints; never proxied, never cached.
    Blocked,
    Unmatched,
}

impl<'a> Route<'a> {
    /// Expects a path already passed through [`normalize_path`].
    pub fn classify(path: &'a str) -> Self {
        if let Some(rest) = path.strip_prefix(NPM_PREFIX) {
            if rest.starts_with(NPM_SECURITY_PREFIX) {
                Route::Blocked
            } else {
                Route::Registry {
                    namespace: Namespace::Npm,
                    rest,
                }
            }
        } else if let Some(rest) = path.strip_prefix(JSR_PREFIX) {
            Route::Registry {
                namespace: Namespace::Jsr,
                rest,
            }
        } else {
            Route::Unmatched
        }
    }
}

/// Folds `%2F` into `%2f` so both spellings of an escaped slash (scoped npm
/// packages) route to, and are cached as, the same resource.
pub fn normalize_path(path: &str) -> String {
    path.replace("%2F", "%2f")
}

/// `<origin>/<rest>[?<query>]`: the URL fetched and the cache key input.
pub fn upstream_url(origin: &str, rest: &str, query: Option<&str>) -> String {
    match query {
        Some(query) if !query.is_empty() => format!("{origin}/{rest}?{query}"),
        _ => format!("{origin}/{rest}"),
    }
}
