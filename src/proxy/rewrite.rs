use bytes::Bytes;

/// True for `application/json` and structured `+json` media types.
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Replaces every literal `<registry_origin>/` in `body` with `replacement`
/// so self-references in package metadata point back at the proxy.
///
/// Bodies that are not valid UTF-8, or that never mention the registry, are
/// returned untouched.
pub fn rewrite_registry_urls(body: Bytes, registry_origin: &str, replacement: &str) -> Bytes {
    let needle = format!("{registry_origin}/");
    match std::str::from_utf8(&body) {
        Ok(text) if text.contains(&needle) => Bytes::from(text.replace(&needle, replacement)),
        _ => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("Application/JSON"));
        assert!(is_json_content_type("application/vnd.npm.install-v1+json"));
        assert!(is_json_content_type(
            "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8"
        ));
    }

    #[test]
    fn rejects_non_json_content_types() {
        assert!(!is_json_content_type("application/octet-stream"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type("text/json-ish"));
        assert!(!is_json_content_type(""));
    }

    #[test]
    fn rewrites_every_occurrence() {
        let body = Bytes::from_static(
            br#"{"_id":"lodash","versions":{"4.17.21":{"dist":{"tarball":"https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz"}}},"homepage":"https://registry.npmjs.org/lodash"}"#,
        );
        let rewritten = rewrite_registry_urls(
            body,
            "https://registry.npmjs.org",
            "http://localhost:8000/npm/",
        );
        let text = std::str::from_utf8(&rewritten).unwrap();
        assert!(!text.contains("registry.npmjs.org"));
        assert!(text.contains("http://localhost:8000/npm/lodash/-/lodash-4.17.21.tgz"));
        assert!(text.contains(r#""homepage":"http://localhost:8000/npm/lodash""#));
    }

    #[test]
    fn leaves_other_hosts_alone() {
        let body = Bytes::from_static(br#"{"repository":"https://github.com/lodash/lodash"}"#);
        let rewritten = rewrite_registry_urls(
            body.clone(),
            "https://registry.npmjs.org",
            "http://localhost:8000/npm/",
        );
        assert_eq!(rewritten, body);
    }

    #[test]
    fn requires_the_trailing_slash() {
        let body = Bytes::from_static(br#"{"registry":"https://registry.npmjs.org"}"#);
        let rewritten = rewrite_registry_urls(
            body.clone(),
            "https://registry.npmjs.org",
            "http://localhost:8000/npm/",
        );
        assert_eq!(rewritten, body);
    }

    #[test]
    fn leaves_invalid_utf8_alone() {
        let mut raw = b"https://registry.npmjs.org/x ".to_vec();
        raw.push(0xff);
        let body = Bytes::from(raw);
        let rewritten = rewrite_registry_urls(
            body.clone(),
            "https://registry.npmjs.org",
            "http://localhost:8000/npm/",
        );
        assert_eq!(rewritten, body);
    }
}
