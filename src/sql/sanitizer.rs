use regex::Regex;

/// Turns raw model output into one directly executable statement.
///
/// Steps, in order: drop a surrounding markdown fence, drop full-line
/// parameter-hint comments (`-- $1 = ...`, `-- params: ...`), drop trailing
/// `;` terminators, trim. The steps repeat until the text stops changing, so a
/// hint line above a fence or a fence inside a fence also comes off and a
/// second `clean` is always a no-op.
///
/// Terminators are only removed at the very end of the text. A statement that
/// ends in a `;` inside a string literal is unterminated SQL anyway, so the
/// trailing anchor never bites into a well-formed literal.
pub struct SqlSanitizer {
    opening_fence: Regex,
    closing_fence: Regex,
    parameter_hint: Regex,
    trailing_terminators: Regex,
}

impl SqlSanitizer {
    pub fn new() -> Self {
        Self {
            opening_fence: Regex::new(r"^\s*```(?:[A-Za-z0-9_+-]*[ \t]*\r?\n)?")
                .expect("opening fence pattern is valid"),
            closing_fence: Regex::new(r"\r?\n?[ \t]*```\s*$").expect("closing fence pattern is valid"),
            parameter_hint: Regex::new(
                r"(?im)^[ \t]*--[ \t]*(?:\$\d+|:[a-z_]\w*|params?\b|parameters?\b).*(?:\r?\n|$)",
            )
            .expect("parameter hint pattern is valid"),
            trailing_terminators: Regex::new(r"(?:\s*;)+\s*$").expect("terminator pattern is valid"),
        }
    }

    pub fn clean(&self, raw: &str) -> String {
        // Every step only removes text, so this terminates
        let mut current = self.clean_once(raw);
        loop {
            let next = self.clean_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn clean_once(&self, raw: &str) -> String {
        let unfenced = self.strip_fence(raw);
        let without_hints = self.parameter_hint.replace_all(&unfenced, "");
        let unterminated = self.trailing_terminators.replace(&without_hints, "");
        unterminated.trim().to_string()
    }

    fn strip_fence(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        let inner = match self.opening_fence.find(trimmed) {
            Some(open) => &trimmed[open.end()..],
            None => trimmed,
        };
        self.closing_fence.replace(inner, "").into_owned()
    }
}

impl Default for SqlSanitizer {
    fn default() -> Self {
        Self::new()
    }
}
