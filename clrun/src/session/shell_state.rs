// Shell state capture and replay for suspend/restore
// The worker can only talk to the shell through the PTY, so capture is two
// redirections into scratch files and restore is one injected export line.

use std::collections::BTreeMap;
use std::path::Path;

/// Variables owned by the shell or the terminal; re-exporting them would clobber
/// values the new shell already set correctly
pub const SKIP_ENV_VARS: &[&str] = &[
    "_",
    "SHLVL",
    "PWD",
    "OLDPWD",
    "SHELL",
    "TERM",
    "TERM_PROGRAM",
    "TERM_PROGRAM_VERSION",
    "TERM_SESSION_ID",
    "TMPDIR",
    "LOGNAME",
    "USER",
    "HOME",
    "LANG",
    "SSH_AUTH_SOCK",
];

/// Single-quote a string for POSIX shells
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Text to write into the PTY so the shell dumps its cwd and NUL-separated env
pub fn capture_commands(cwd_file: &Path, env_file: &Path) -> String {
    format!(
        "pwd > {}\nenv -0 > {}\n",
        shell_quote(&cwd_file.to_string_lossy()),
        shell_quote(&env_file.to_string_lossy())
    )
}

/// Parse an `env -0` dump; entries without `=` or with an empty name are dropped
pub fn parse_env_dump(bytes: &[u8]) -> BTreeMap<String, String> {
    let text = String::from_utf8_lossy(bytes);
    text.split('\0')
        .filter_map(|entry| {
            let eq = entry.find('=')?;
            if eq == 0 {
                return None;
            }
            Some((entry[..eq].to_string(), entry[eq + 1..].to_string()))
        })
        .collect()
}

pub fn is_shell_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Variables worth re-exporting after a restore
pub fn restorable_vars(env: &BTreeMap<String, String>) -> Vec<(&str, &str)> {
    env.iter()
        .filter(|(k, _)| !SKIP_ENV_VARS.contains(&k.as_str()) && is_shell_identifier(k))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

/// A single `export A='1' && export B='2'` line, or `None` when nothing to restore
pub fn export_line(env: &BTreeMap<String, String>) -> Option<String> {
    let exports: Vec<String> = restorable_vars(env)
        .into_iter()
        .map(|(k, v)| format!("export {}={}", k, shell_quote(v)))
        .collect();

    if exports.is_empty() {
        return None;
    }
    Some(format!("{}\n", exports.join(" && ")))
}
