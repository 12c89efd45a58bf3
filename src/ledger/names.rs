/// Deterministic slug of a display name: lowercase alphanumerics with every
/// other run of characters collapsed to a single `-`, trimmed at both ends.
pub fn normalize_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Science Museum"), "science-museum");
        assert_eq!(normalize_name("  The  Zoo -- North Gate!  "), "the-zoo-north-gate");
        assert_eq!(normalize_name("Café Ñandú"), "café-ñandú");
        assert_eq!(normalize_name("Hall 9"), normalize_name("hall_9"));
        assert_eq!(normalize_name("!!!"), "");
    }
}
