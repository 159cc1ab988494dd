// Named keys -> terminal byte sequences

use crate::session::error::SessionError;

/// Priority used for key sequences; above typical input, below overrides
pub const KEY_PRIORITY: i64 = 999;

pub const NAMED_KEYS: &[(&str, &str)] = &[
    ("up", "\x1b[A"),
    ("down", "\x1b[B"),
    ("right", "\x1b[C"),
    ("left", "\x1b[D"),
    ("enter", "\r"),
    ("return", "\r"),
    ("tab", "\t"),
    ("escape", "\x1b"),
    ("esc", "\x1b"),
    ("space", " "),
    ("backspace", "\x7f"),
    ("delete", "\x1b[3~"),
    ("home", "\x1b[H"),
    ("end", "\x1b[F"),
    ("pageup", "\x1b[5~"),
    ("pagedown", "\x1b[6~"),
    ("ctrl-c", "\x03"),
    ("ctrl-d", "\x04"),
    ("ctrl-z", "\x1a"),
    ("ctrl-l", "\x0c"),
    ("ctrl-a", "\x01"),
    ("ctrl-e", "\x05"),
    ("y", "y"),
    ("n", "n"),
];

pub fn lookup_key(name: &str) -> Option<&'static str> {
    let name = name.to_ascii_lowercase();
    NAMED_KEYS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, seq)| *seq)
}

/// Concatenate the sequences for `names`; every unknown name is reported
pub fn resolve_keys<S: AsRef<str>>(names: &[S]) -> Result<String, SessionError> {
    let mut sequence = String::new();
    let mut unknown = Vec::new();

    for name in names {
        match lookup_key(name.as_ref()) {
            Some(seq) => sequence.push_str(seq),
            None => unknown.push(name.as_ref().to_string()),
        }
    }

    if !unknown.is_empty() {
        return Err(SessionError::InvalidKeys { unknown });
    }
    Ok(sequence)
}

pub fn key_names() -> Vec<&'static str> {
    NAMED_KEYS.iter().map(|(name, _)| *name).collect()
}
