/// Lowercases a domain name and strips the trailing dot, so that "Example.ORG." and
/// "example.org" compare equal. The root zone becomes an empty string.
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Checks whether `name` is equal to `zone` or is one of its subdomains.
/// Both names are expected to be normalized.
pub fn is_subdomain(name: &str, zone: &str) -> bool {
    if zone.is_empty() {
        // Root zone contains every name
        return true;
    }
    match name.strip_suffix(zone) {
        Some("") => true,
        Some(prefix) => prefix.ends_with('.'),
        None => false,
    }
}
