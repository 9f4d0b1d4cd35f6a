use crate::{Error, Result};

const MIN_PASSPHRASE_LEN: usize = 12;

/// Check a passphrase against the vault policy.
///
/// Requires at least 12 characters with one uppercase letter, one
/// lowercase letter, one digit and one special character.
pub fn check_passphrase_strength(passphrase: &str) -> Result<()> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(Error::PassphraseWeak(format!(
            "must be at least {MIN_PASSPHRASE_LEN} characters long"
        )));
    }

    let mut upper = false;
    let mut lower = false;
    let mut digit = false;
    let mut special = false;

    for c in passphrase.chars() {
        if c.is_uppercase() {
            upper = true;
        } else if c.is_lowercase() {
            lower = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else {
            special = true;
        }
    }

    let missing = [
        (upper, "an uppercase letter"),
        (lower, "a lowercase letter"),
        (digit, "a digit"),
        (special, "a special character"),
    ]
    .iter()
    .filter(|(ok, _)| !ok)
    .map(|(_, what)| *what)
    .collect::<Vec<_>>();

    if !missing.is_empty() {
        return Err(Error::PassphraseWeak(format!(
            "must contain {}",
            missing.join(", ")
        )));
    }

    Ok(())
}

#[test]
fn test_passphrase_policy() {
    assert!(check_passphrase_strength("Short1!").is_err());
    assert!(check_passphrase_strength("alllowercase1!aa").is_err());
    assert!(check_passphrase_strength("NODIGITSHERE!AA").is_err());
    assert!(check_passphrase_strength("Correct-Horse-42").is_ok());
}
