use url::Url;

/// Normalized hostname of a tab URL, used as the record domain.
///
/// Ports, paths and query strings are dropped; IPv6 literals keep their
/// brackets. Scheme-less input such as `example.com:8080/path` is accepted.
pub fn extract_hostname(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if input.contains("://") {
        if let Ok(url) = Url::parse(input) {
            if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
                return Some(host.to_string());
            }
        }
    }

    manual_hostname(input)
}

fn manual_hostname(input: &str) -> Option<String> {
    let authority = match input.split_once("://") {
        Some((_, rest)) => rest.split('/').next().unwrap_or_default(),
        None => input.split('/').next().unwrap_or_default(),
    };

    // Credentials are not part of the host.
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    let host = if authority.starts_with('[') {
        match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        }
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    let host = host.split(['?', '#']).next().unwrap_or_default();

    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}
