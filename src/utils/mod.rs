use std::net::IpAddr;

/// Validate a device management address (IPv4 or IPv6).
pub fn is_valid_address(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok()
}

/// Validate a hostname.
/// Allows alphanumeric, hyphens, dots, and underscores. No path separators or shell metacharacters.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

/// Inventory exports name session files after the device, e.g. `10.0.0.1.xsh`
pub fn strip_session_suffix(address: &str) -> &str {
    let address = address.trim();
    address.strip_suffix(".xsh").unwrap_or(address)
}

/// Split one CSV line on commas, honouring double-quoted fields.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_address() {
        assert!(is_valid_address("192.168.1.1"));
        assert!(is_valid_address("2001:db8::10"));
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("not-an-ip"));
        assert!(!is_valid_address("256.1.1.1"));
        assert!(!is_valid_address("1.2.3"));
        assert!(!is_valid_address("; rm -rf /"));
    }

    #[test]
    fn test_is_valid_hostname() {
        assert!(is_valid_hostname("switch-01"));
        assert!(is_valid_hostname("router.lab.local"));
        assert!(is_valid_hostname("my_host"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("host name")); // spaces
        assert!(!is_valid_hostname("host;rm")); // semicolon
        assert!(!is_valid_hostname("../etc/passwd")); // path traversal
        assert!(!is_valid_hostname("host\nname")); // newline
    }

    #[test]
    fn test_strip_session_suffix() {
        assert_eq!(strip_session_suffix("10.0.0.1.xsh"), "10.0.0.1");
        assert_eq!(strip_session_suffix(" 10.0.0.2 "), "10.0.0.2");
    }

    #[test]
    fn test_split_csv_line() {
        assert_eq!(split_csv_line("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(split_csv_line(r#"sw1,"pa,ss""word",x"#), vec!["sw1", r#"pa,ss"word"#, "x"]);
        assert_eq!(split_csv_line(""), vec![""]);
    }
}
