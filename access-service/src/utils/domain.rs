//! Domain normalization for license binding.
//!
//! Plugins report whatever their site URL looks like (`https://www.Example.com/`,
//! `example.com:8443`, ...). Bindings compare the normalized host only.

/// Reduce a URL or bare host to `host[:port]`, lowercase, without scheme,
/// credentials, path, query, fragment, trailing dot or a leading `www.`.
pub fn normalize_domain(input: &str) -> Option<String> {
    let lowered = input.trim().to_ascii_lowercase();

    let without_scheme = match lowered.find("://") {
        Some(idx) => &lowered[idx + 3..],
        None => lowered.as_str(),
    };

    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);

    let well_formed = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':' | '[' | ']'));

    well_formed.then(|| host.to_string())
}
