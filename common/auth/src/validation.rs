use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

/// Syntactic email check applied before any provider call.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email.trim())
}

/// Password rule the registration form enforces before calling `sign_up`.
///
/// The session store itself never applies this; it is exported for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 6,
            require_lowercase: true,
            require_uppercase: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordViolation {
    TooShort { min_length: usize },
    MissingLowercase,
    MissingUppercase,
}

impl PasswordPolicy {
    /// Returns every rule the password breaks; empty means acceptable.
    pub fn violations(&self, password: &str) -> Vec<PasswordViolation> {
        let mut violations = Vec::new();
        if password.chars().count() < self.min_length {
            violations.push(PasswordViolation::TooShort {
                min_length: self.min_length,
            });
        }
        if self.require_lowercase && !password.chars().any(char::is_lowercase) {
            violations.push(PasswordViolation::MissingLowercase);
        }
        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            violations.push(PasswordViolation::MissingUppercase);
        }
        violations
    }

    pub fn accepts(&self, password: &str) -> bool {
        self.violations(password).is_empty()
    }
}
