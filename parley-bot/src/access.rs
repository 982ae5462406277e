//! Static allow-list access control.

/// Whether a sender may use the bot.
///
/// An empty allow-list admits everyone; otherwise an entry must match the
/// sender's username or numeric id exactly.
pub fn is_user_allowed(allowed: &[String], username: Option<&str>, user_id: i64) -> bool {
    if allowed.is_empty() {
        return true;
    }

    let id = user_id.to_string();
    allowed.iter().any(|entry| {
        entry == &id || username.is_some_and(|name| !name.is_empty() && entry == name)
    })
}

/// Display form of a sender for logs: `@name (#id)` or `#id`.
pub fn format_sender(username: Option<&str>, user_id: i64) -> String {
    match username {
        Some(name) if !name.is_empty() => format!("@{name} (#{user_id})"),
        _ => format!("#{user_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn empty_list_admits_everyone() {
        assert!(is_user_allowed(&[], Some("anyone"), 1));
        assert!(is_user_allowed(&[], None, 2));
    }

    #[test]
    fn matches_username() {
        let allowed = list(&["alice", "bob"]);
        assert!(is_user_allowed(&allowed, Some("alice"), 1));
        assert!(!is_user_allowed(&allowed, Some("eve"), 1));
    }

    #[test]
    fn matches_numeric_id() {
        let allowed = list(&["1001"]);
        assert!(is_user_allowed(&allowed, None, 1001));
        assert!(is_user_allowed(&allowed, Some("whoever"), 1001));
        assert!(!is_user_allowed(&allowed, None, 1002));
    }

    #[test]
    fn exact_match_only() {
        let allowed = list(&["alice"]);
        assert!(!is_user_allowed(&allowed, Some("alice_bot"), 1));
        assert!(!is_user_allowed(&allowed, Some("Alice"), 1));
        assert!(!is_user_allowed(&allowed, Some(""), 1));
    }

    #[test]
    fn format_sender_with_and_without_name() {
        assert_eq!(format_sender(Some("alice"), 7), "@alice (#7)");
        assert_eq!(format_sender(None, 7), "#7");
        assert_eq!(format_sender(Some(""), 7), "#7");
    }
}
