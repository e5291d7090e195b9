use std::sync::OnceLock;

use regex::Regex;

/// A chat command split into name and arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lowercased command name, without the prefix.
    pub name: String,
    /// Whitespace-separated arguments.
    pub args: Vec<String>,
    /// Everything after the name, leading whitespace trimmed, inner spacing kept.
    pub rest: String,
}

impl ParsedCommand {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// The raw text after skipping the first `n` arguments.
    pub fn rest_after(&self, n: usize) -> &str {
        let mut s = self.rest.as_str();
        for _ in 0..n {
            s = s.trim_start();
            match s.find(char::is_whitespace) {
                Some(idx) => s = &s[idx..],
                None => return "",
            }
        }
        s.trim_start()
    }
}

fn name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\p{L}\p{N}_\-]+$").expect("valid command name regex"))
}

/// Whether `name` can be used as a command call (letters, digits, `_`, `-`).
pub fn is_valid_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

/// Parse `content` as a command if it starts with `prefix` followed directly
/// by a valid command name.
///
/// `!quote add hi` → name `quote`, args `[add, hi]`, rest `add hi`.
/// `! quote`, `!!`, plain text → `None`.
pub fn parse_command(content: &str, prefix: &str) -> Option<ParsedCommand> {
    let trimmed = content.trim();
    let after_prefix = trimmed.strip_prefix(prefix)?;

    let (raw_name, rest) = match after_prefix.find(char::is_whitespace) {
        Some(idx) => (&after_prefix[..idx], after_prefix[idx..].trim_start()),
        None => (after_prefix, ""),
    };

    let name = raw_name.to_lowercase();
    if name.is_empty() || !is_valid_name(&name) {
        return None;
    }

    Some(ParsedCommand {
        name,
        args: rest.split_whitespace().map(str::to_string).collect(),
        rest: rest.to_string(),
    })
}

/// Parse a 1-based position argument. `0`, negatives and non-digits are rejected.
pub fn parse_position(arg: Option<&str>) -> Option<usize> {
    let arg = arg?;
    if arg.is_empty() || !arg.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    arg.parse::<usize>().ok().filter(|n| *n > 0)
}
