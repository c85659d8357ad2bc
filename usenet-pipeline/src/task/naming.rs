//! Generated names, passwords and sender addresses.

use rand::RngExt;

use super::settings::RandomSettings;

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMBERS: &str = "0123456789";
const SPECIAL: &str = "!@#$%^&*()-_=+";

/// Produce a name or password from `settings`.
///
/// In custom mode the template is returned as-is so variable substitution can
/// expand it later. In random mode the result is
/// `prefix + random(length) + suffix`.
pub fn generate_name(settings: &RandomSettings) -> String {
    if !settings.random_name_mode {
        return settings.custom_name.clone();
    }

    let mut alphabet = String::new();
    if settings.use_lowercase {
        alphabet.push_str(LOWERCASE);
    }
    if settings.use_uppercase {
        alphabet.push_str(UPPERCASE);
    }
    if settings.use_numbers {
        alphabet.push_str(NUMBERS);
    }
    if settings.use_special_characters {
        alphabet.push_str(SPECIAL);
    }
    if alphabet.is_empty() {
        alphabet.push_str(LOWERCASE);
    }

    format!(
        "{}{}{}",
        settings.prefix,
        random_from(&alphabet, settings.random_name_length),
        settings.suffix
    )
}

/// Random lowercase letters.
pub fn random_letters(len: usize) -> String {
    random_from(LOWERCASE, len)
}

/// A throwaway sender of the form `xxxxxx@xxxx.xx`.
pub fn random_sender() -> String {
    format!(
        "{}@{}.{}",
        random_letters(6),
        random_letters(4),
        random_letters(2)
    )
}

fn random_from(alphabet: &str, len: usize) -> String {
    let chars: Vec<char> = alphabet.chars().collect();
    let mut rng = rand::rng();
    (0..len)
        .map(|_| chars[rng.random_range(0..chars.len())])
        .collect()
}
