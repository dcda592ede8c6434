use std::fmt;
use std::str::FromStr;

use regex::Regex;

use serde::Serialize;

use unicode_segmentation::UnicodeSegmentation;

const MAX_LEN: usize = 256;

/// A validated email address, normalized (trimmed, lowercased) so that two
/// spellings of the same address map to the same signup identity.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
pub struct EmailAddress(String);

impl FromStr for EmailAddress {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        lazy_static::lazy_static! {
            static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
        }

        // Normalize before any check so validation and storage agree
        let value = value.trim().to_lowercase();

        if value.is_empty() {
            return Err("Email address cannot be empty".into());
        }
        if value.graphemes(true).count() > MAX_LEN {
            return Err("Email address too long".into());
        }
        if !EMAIL_REGEX.is_match(&value) {
            return Err("Email address of incorrect format".into());
        }

        Ok(Self(value))
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok};

    #[derive(Debug, Clone)]
    struct ValidEmailFixture(pub String);

    impl quickcheck::Arbitrary for ValidEmailFixture {
        fn arbitrary<G: quickcheck::Gen>(g: &mut G) -> Self {
            use fake::faker::internet::en::SafeEmail;
            use fake::Fake;

            let email: String = SafeEmail().fake_with_rng(g);
            Self(email)
        }
    }

    #[quickcheck_macros::quickcheck]
    fn safe_emails_valid(valid_email: ValidEmailFixture) -> bool {
        valid_email.0.parse::<EmailAddress>().is_ok()
    }

    #[test]
    fn mixed_case_is_normalized() {
        let email: EmailAddress = " Alice@Example.COM ".parse().unwrap();
        assert_eq!(email.as_ref(), "alice@example.com");
    }

    #[test]
    fn same_address_different_spelling_is_equal() {
        let a: EmailAddress = "alice@example.com".parse().unwrap();
        let b: EmailAddress = "ALICE@example.com".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn too_long_email_invalid() {
        let domain = "@test.com".to_string();
        let subject = "ё".repeat(258 - domain.len());
        let email = format!("{}{}", subject, domain);

        assert_err!(email.parse::<EmailAddress>());
    }

    #[test]
    fn dotted_local_part_valid() {
        assert_ok!("first.last@example.com".parse::<EmailAddress>());
    }

    #[test]
    fn blank_email_invalid() {
        let email = "    ";
        assert_err!(email.parse::<EmailAddress>());
    }

    #[test]
    fn domain_only_invalid() {
        let email = "test.com";
        assert_err!(email.parse::<EmailAddress>());
    }

    #[test]
    fn subject_only_invalid() {
        let email = "@test.com";
        assert_err!(email.parse::<EmailAddress>());
    }

    #[test]
    fn missing_tld_invalid() {
        let email = "alice@localhost";
        assert_err!(email.parse::<EmailAddress>());
    }
}
