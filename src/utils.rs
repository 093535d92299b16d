use chrono::{DateTime, Duration, Utc};

pub fn format_window_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// `now + duration`, saturating at the largest representable instant.
pub fn expiry_after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(duration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whether a request path belongs to the admin surface.
pub fn is_admin_path(path: &str) -> bool {
    path.get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("/admin"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_path_matching() {
        assert!(is_admin_path("/admin"));
        assert!(is_admin_path("/Admin/login"));
        assert!(is_admin_path("/ADMIN/dashboard"));
        assert!(!is_admin_path("/"));
        assert!(!is_admin_path("/adm"));
        assert!(!is_admin_path("/rooms/admin"));
    }

    #[test]
    fn test_expiry_saturates() {
        let now = DateTime::<Utc>::MAX_UTC - Duration::seconds(1);
        assert_eq!(expiry_after(now, Duration::days(1)), DateTime::<Utc>::MAX_UTC);
    }
}
