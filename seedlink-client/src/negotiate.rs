/// Parse capabilities from the `extra` field of a HELLO response.
///
/// The extra field may look like:
/// - `"(2020.075) :: SLPROTO:4.0 SLPROTO:3.1"` — contains `"::"` separator
/// - `"SLPROTO:4.0 SLPROTO:3.1"` — already stripped by `parse_hello` when no extra text
///
/// We split on `"::"` and parse tokens from the right side. If no `"::"` is found,
/// we look for capability-style tokens (containing `:`) in the full string.
pub fn parse_capabilities(extra: &str) -> Vec<String> {
    if let Some(idx) = extra.find("::") {
        let right = extra[idx + 2..].trim();
        if right.is_empty() {
            return Vec::new();
        }
        return right.split_whitespace().map(|s| s.to_owned()).collect();
    }

    // No "::" separator — check if the string itself contains capability tokens
    let tokens: Vec<String> = extra
        .split_whitespace()
        .filter(|t| t.contains(':'))
        .map(|s| s.to_owned())
        .collect();
    tokens
}

/// Check if capabilities include SeedLink v4 support.
pub fn supports_v4(capabilities: &[String]) -> bool {
    capabilities.iter().any(|c| c == "SLPROTO:4.0")
}

/// Check if the hello-line capabilities advertise the `CAP` flag, meaning the
/// v3 server understands `CAPABILITIES`/`GETCAPABILITIES` negotiation.
pub fn advertises_cap(capabilities: &[String]) -> bool {
    capabilities.iter().any(|c| c == "CAP")
}

/// Parses a `SLPROTO:<major>.<minor>` capability token.
pub fn parse_slproto(token: &str) -> Option<(u32, u32)> {
    let rest = token.strip_prefix("SLPROTO:")?;
    let (major, minor) = rest.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Scans capability tokens for the highest advertised `SLPROTO` version.
///
/// Returns `None` if no `SLPROTO:` token is present.
pub fn highest_slproto(capabilities: &[String]) -> Option<(u32, u32)> {
    capabilities.iter().filter_map(|c| parse_slproto(c)).max()
}

/// Builds the `USERAGENT` description body: `<name>[/<version>]
/// libslink/<libver>`, matching the wire form SeedLink v4 servers expect.
pub fn user_agent_description(client_name: &str, client_version: &str) -> String {
    format!(
        "{client_name}/{client_version} libslink/{}",
        env!("CARGO_PKG_VERSION")
    )
}
