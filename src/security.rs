//! Command hygiene for external recorder processes.
//!
//! Every spawn goes through a [`CommandPolicy`]: the command name must be
//! on the allow-list and arguments are sanitized before they reach the
//! process builder.

use once_cell::sync::Lazy;
use regex::Regex;

/// Tools the recording subsystem is allowed to spawn.
const ALLOWED_COMMANDS: &[&str] = &["arecord", "ffmpeg", "pactl", "parec", "whisper-cli"];

/// Argument characters accepted verbatim. Device and source names on
/// PipeWire/PulseAudio use dots, colons and underscores
/// (e.g. "alsa_input.pci-0000_00_1f.3.analog-stereo").
static SAFE_ARG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_./:=@%+,\-]{1,256}$").unwrap());

/// Decides which external commands may be spawned and scrubs their
/// arguments. The recording subsystem consults this before every spawn.
pub trait CommandPolicy: Send + Sync {
    fn is_command_allowed(&self, name: &str) -> bool;

    /// Returns the arguments with anything shell-hostile removed.
    fn sanitize_args(&self, args: &[String]) -> Vec<String>;
}

/// Production policy: fixed allow-list, character-class argument scrub.
#[derive(Debug, Default)]
pub struct RecordingToolPolicy;

impl CommandPolicy for RecordingToolPolicy {
    fn is_command_allowed(&self, name: &str) -> bool {
        // Strip a leading path so "/usr/bin/ffmpeg" and "ffmpeg" match
        // the same entry.
        let base = name.rsplit('/').next().unwrap_or(name);
        ALLOWED_COMMANDS.contains(&base)
    }

    fn sanitize_args(&self, args: &[String]) -> Vec<String> {
        args.iter().map(|arg| sanitize_arg(arg)).collect()
    }
}

fn sanitize_arg(arg: &str) -> String {
    if SAFE_ARG_PATTERN.is_match(arg) {
        return arg.to_string();
    }

    arg.chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '_' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',' | '-')
        })
        .take(256)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_known_tools_with_or_without_path() {
        let policy = RecordingToolPolicy;
        assert!(policy.is_command_allowed("arecord"));
        assert!(policy.is_command_allowed("/usr/bin/ffmpeg"));
        assert!(!policy.is_command_allowed("bash"));
        assert!(!policy.is_command_allowed("rm"));
    }

    #[test]
    fn sanitize_strips_shell_metacharacters() {
        let policy = RecordingToolPolicy;
        let args = vec![
            "-D".to_string(),
            "hw:0,0".to_string(),
            "$(reboot)".to_string(),
            "a;b|c".to_string(),
        ];
        let clean = policy.sanitize_args(&args);
        assert_eq!(clean[0], "-D");
        assert_eq!(clean[1], "hw:0,0");
        assert_eq!(clean[2], "reboot");
        assert_eq!(clean[3], "abc");
    }

    #[test]
    fn sanitize_keeps_pulse_source_names() {
        let policy = RecordingToolPolicy;
        let args = vec!["alsa_input.pci-0000_00_1f.3.analog-stereo".to_string()];
        assert_eq!(policy.sanitize_args(&args), args);
    }
}
