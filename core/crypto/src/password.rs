//! Password strength rules and scoring.
//!
//! Enforced before a password is ever handed to key derivation. Pure
//! functions: no I/O, no side effects.

use std::fmt;

/// Minimum password length.
pub const MIN_LENGTH: usize = 8;

/// Maximum password length.
pub const MAX_LENGTH: usize = 128;

/// A password rule that a candidate password violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordRule {
    /// Shorter than [`MIN_LENGTH`] characters.
    TooShort,
    /// Longer than [`MAX_LENGTH`] characters.
    TooLong,
    /// Contains no letter.
    MissingLetter,
    /// Contains no digit.
    MissingDigit,
}

impl fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "must be at least {} characters", MIN_LENGTH),
            Self::TooLong => write!(f, "must be at most {} characters", MAX_LENGTH),
            Self::MissingLetter => write!(f, "must contain at least one letter"),
            Self::MissingDigit => write!(f, "must contain at least one digit"),
        }
    }
}

/// Validate a password against the container's password policy.
///
/// Returns the list of violated rules; an empty list means the password
/// is acceptable.
pub fn validate(password: &str) -> Vec<PasswordRule> {
    let mut violations = Vec::new();
    let len = password.chars().count();

    if len < MIN_LENGTH {
        violations.push(PasswordRule::TooShort);
    }
    if len > MAX_LENGTH {
        violations.push(PasswordRule::TooLong);
    }
    if !password.chars().any(|c| c.is_alphabetic()) {
        violations.push(PasswordRule::MissingLetter);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PasswordRule::MissingDigit);
    }

    violations
}

/// Score a password's strength on a 0..=100 scale.
///
/// Additive score from length and character-class variety, with penalties
/// for runs of three or more identical characters and for ascending or
/// descending sequential runs ("abc", "321").
pub fn strength_score(password: &str) -> u8 {
    if password.is_empty() {
        return 0;
    }

    let chars: Vec<char> = password.chars().collect();
    let mut score: i32 = 0;

    // Length: 2 points per character up to 40.
    score += (chars.len() as i32 * 2).min(40);

    // Character-class variety: 10 points per class.
    if chars.iter().any(|c| c.is_lowercase()) {
        score += 10;
    }
    if chars.iter().any(|c| c.is_uppercase()) {
        score += 10;
    }
    if chars.iter().any(|c| c.is_ascii_digit()) {
        score += 10;
    }
    if chars.iter().any(|c| !c.is_alphanumeric()) {
        score += 10;
    }

    // Bonus for long passphrases.
    if chars.len() >= 16 {
        score += 20;
    }

    score -= 5 * count_runs(&chars, |a, b| a == b);
    score -= 5 * count_sequential_runs(&chars);

    score.clamp(0, 100) as u8
}

/// Count runs of three or more characters where each adjacent pair
/// satisfies `related`.
fn count_runs(chars: &[char], related: impl Fn(char, char) -> bool) -> i32 {
    let mut runs = 0;
    let mut run_len = 1;

    for pair in chars.windows(2) {
        if related(pair[0], pair[1]) {
            run_len += 1;
            if run_len == 3 {
                runs += 1;
            }
        } else {
            run_len = 1;
        }
    }

    runs
}

/// Count ascending or descending runs of three or more characters.
///
/// A run must keep one direction: "abc" and "321" count, "aba" does not.
fn count_sequential_runs(chars: &[char]) -> i32 {
    let mut runs = 0;
    let mut run_len = 1;
    let mut direction = 0i32;

    for pair in chars.windows(2) {
        let step = if is_successor(pair[0], pair[1]) {
            1
        } else if is_predecessor(pair[0], pair[1]) {
            -1
        } else {
            0
        };

        if step != 0 && step == direction {
            run_len += 1;
            if run_len == 3 {
                runs += 1;
            }
        } else if step != 0 {
            direction = step;
            run_len = 2;
        } else {
            direction = 0;
            run_len = 1;
        }
    }

    runs
}

fn is_successor(a: char, b: char) -> bool {
    (b as u32) == (a as u32) + 1
}

fn is_predecessor(a: char, b: char) -> bool {
    (a as u32) == (b as u32) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_good_password() {
        assert!(validate("Secret123").is_empty());
    }

    #[test]
    fn test_validate_too_short() {
        assert!(validate("Ab1").contains(&PasswordRule::TooShort));
    }

    #[test]
    fn test_validate_too_long() {
        let long: String = std::iter::repeat("a1").take(70).collect();
        assert!(validate(&long).contains(&PasswordRule::TooLong));
    }

    #[test]
    fn test_validate_missing_classes() {
        let violations = validate("12345678");
        assert!(violations.contains(&PasswordRule::MissingLetter));
        assert!(!violations.contains(&PasswordRule::MissingDigit));

        let violations = validate("abcdefgh");
        assert!(violations.contains(&PasswordRule::MissingDigit));
        assert!(!violations.contains(&PasswordRule::MissingLetter));
    }

    #[test]
    fn test_strength_score_empty() {
        assert_eq!(strength_score(""), 0);
    }

    #[test]
    fn test_strength_score_variety_beats_monoculture() {
        let plain = strength_score("aaaaaaaa");
        let varied = strength_score("aB3$kW9!");
        assert!(varied > plain);
    }

    #[test]
    fn test_strength_score_penalizes_repeats() {
        // Same classes and length, but one has a repeated run.
        assert!(strength_score("aaab1234") < strength_score("axcb1739"));
    }

    #[test]
    fn test_strength_score_penalizes_sequences() {
        assert!(strength_score("abcd5678") < strength_score("axvq5193"));
    }

    #[test]
    fn test_alternating_pairs_are_not_sequential_runs() {
        let alternating: Vec<char> = "ababab".chars().collect();
        assert_eq!(count_sequential_runs(&alternating), 0);

        let ascending: Vec<char> = "abcdef".chars().collect();
        assert_eq!(count_sequential_runs(&ascending), 1);

        let descending: Vec<char> = "987".chars().collect();
        assert_eq!(count_sequential_runs(&descending), 1);

        let reversal: Vec<char> = "abccba".chars().collect();
        assert_eq!(count_sequential_runs(&reversal), 2);
    }

    #[test]
    fn test_strength_score_bounded() {
        let strong = "Tr0ub4dor&3-horse-battery-staple!";
        assert!(strength_score(strong) <= 100);
    }
}
