//! Terminal output helpers for command results
use std::io::IsTerminal;

/// `[cpack]`, bright cyan when stderr is a terminal
pub fn cpack_prefix() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[96m[cpack]\x1b[0m"
    } else {
        "[cpack]"
    }
}

/// Check mark for success lines, green on a terminal
pub fn ok_mark() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[32m✓\x1b[0m"
    } else {
        "✓"
    }
}

/// Cross for failure lines, red on a terminal
pub fn fail_mark() -> &'static str {
    if std::io::stderr().is_terminal() {
        "\x1b[31m✗\x1b[0m"
    } else {
        "✗"
    }
}
