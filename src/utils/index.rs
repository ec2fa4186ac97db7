/// Shorten a long hex string (hash, address) for log lines: `0x1234abcd..9f0e`.
pub fn abbreviate_hash(value: &str) -> String {
    let body = value.strip_prefix("0x").unwrap_or(value);
    if body.len() <= 12 || !body.is_ascii() {
        return value.to_string();
    }
    let prefix = if value.starts_with("0x") { "0x" } else { "" };
    format!("{}{}..{}", prefix, &body[..8], &body[body.len() - 4..])
}
