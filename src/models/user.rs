//! Accounts and their profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Maximum length of `first_name` / `last_name` on an account.
pub const NAME_PART_MAX_LEN: usize = 30;

/// A user account. Organizations wrap one of these as well.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    pub id: i64,
    /// Globally unique login name.
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub date_joined: DateTime<Utc>,
}

impl User {
    /// Split a display name into `(first_name, last_name)`.
    ///
    /// Names longer than twice the account limit are cut into two fixed-size
    /// halves; otherwise the first word is the first name and the rest the last.
    pub fn split_name(name: &str) -> (String, String) {
        let chars: Vec<char> = name.chars().collect();
        if chars.len() > NAME_PART_MAX_LEN * 2 {
            let first = chars[..NAME_PART_MAX_LEN].iter().collect();
            let last = chars[NAME_PART_MAX_LEN..NAME_PART_MAX_LEN * 2]
                .iter()
                .collect();
            return (first, last);
        }

        let mut words = name.split_whitespace();
        let first = words.next().unwrap_or_default().to_string();
        let last = words.collect::<Vec<_>>().join(" ");
        (first, last)
    }
}

/// Gravatar URL derived from an account email.
pub fn gravatar_url(email: &str) -> String {
    let digest = md5::compute(email.trim().to_lowercase());
    format!("https://secure.gravatar.com/avatar/{:x}?s=60&d=mm", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_name_uses_first_word_as_first_name() {
        assert_eq!(
            User::split_name("Open Data Kit Org"),
            ("Open".to_string(), "Data Kit Org".to_string())
        );
        assert_eq!(User::split_name("Solo"), ("Solo".to_string(), String::new()));
    }

    #[test]
    fn split_name_cuts_very_long_names() {
        let name = "x".repeat(70);
        let (first, last) = User::split_name(&name);
        assert_eq!(first.len(), NAME_PART_MAX_LEN);
        assert_eq!(last.len(), NAME_PART_MAX_LEN);
    }

    #[test]
    fn gravatar_hashes_lowercased_email() {
        let expected = format!("{:x}", md5::compute("bob@example.com"));
        assert_eq!(
            gravatar_url(" Bob@Example.com"),
            format!("https://secure.gravatar.com/avatar/{}?s=60&d=mm", expected)
        );
    }
}
