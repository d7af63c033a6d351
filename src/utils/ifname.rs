//! Linux network interface name rules.

use regex::Regex;
use std::sync::OnceLock;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

fn interface_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.:\-]+$").expect("interface name pattern compiles"))
}

/// Check whether `name` can be used as a Linux interface name.
///
/// Names are 1 to 15 characters, contain no whitespace or `/`, and are
/// neither `.` nor `..`.
pub fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_INTERFACE_NAME_LEN
        && name != "."
        && name != ".."
        && interface_name_pattern().is_match(name)
}

/// Check whether `name` can be used as a node name.
///
/// Node names show up in namespace names and generated interface names,
/// so the same character set applies, without the length cap.
pub fn is_valid_node_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && interface_name_pattern().is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_names() {
        assert!(is_valid_interface_name("r1-eth0"));
        assert!(is_valid_interface_name("s10-eth12"));
        assert!(is_valid_interface_name("eth0.100"));
        assert!(is_valid_interface_name("abcdefghijklmno"));

        assert!(!is_valid_interface_name(""));
        assert!(!is_valid_interface_name("abcdefghijklmnop"));
        assert!(!is_valid_interface_name("has space"));
        assert!(!is_valid_interface_name("a/b"));
        assert!(!is_valid_interface_name(".."));
    }

    #[test]
    fn test_node_names() {
        assert!(is_valid_node_name("h1"));
        assert!(is_valid_node_name("border-router-west"));
        assert!(!is_valid_node_name(""));
        assert!(!is_valid_node_name("h 1"));
        assert!(!is_valid_node_name("../etc"));
    }
}
