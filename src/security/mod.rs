//! URL and command-argument validation (C1, §4.1).
//!
//! Every element source is run through [`validate`] before it is allowed anywhere near a
//! subprocess argument vector. `sanitize` is a separate, narrower helper for the rare case
//! where a raw token (not a URL) must be passed through to a subprocess.

use tracing::warn;

const FORBIDDEN_PREFIXES: &[&str] = &["data:", "javascript:", "vbscript:", "file:", "ftp:"];
// `\` is deliberately not listed: it has no shell metacharacter meaning on the `http(s)://`
// URLs this validator actually accepts (traversal is instead caught by FORBIDDEN_SEQUENCES'
// `..\` entry), and flagging it here would reject ordinary percent-unescaped Windows-style
// path segments some CDNs echo back in query strings.
const FORBIDDEN_CHARS: &[char] = &[';', '|', '`', '$', '(', ')', '{', '}'];
const FORBIDDEN_SEQUENCES: &[&str] = &["../", "..\\"];
const MAX_URL_LEN: usize = 2048;

const DANGEROUS_COMMANDS: &[&str] = &[
    "rm", "cat", "ls", "chmod", "chown", "sudo", "su", "bash", "sh", "cmd", "powershell", "wget",
    "curl", "nc", "netcat",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationType {
    Empty,
    ForbiddenProtocol,
    ForbiddenCharacters,
    PathTraversal,
    UnparsableUrl,
    EmptyHost,
    UnsupportedScheme,
    DomainNotAllowed,
    TooLong,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::Empty => "empty",
            ViolationType::ForbiddenProtocol => "forbidden_protocol",
            ViolationType::ForbiddenCharacters => "forbidden_characters",
            ViolationType::PathTraversal => "path_traversal",
            ViolationType::UnparsableUrl => "unparsable_url",
            ViolationType::EmptyHost => "empty_host",
            ViolationType::UnsupportedScheme => "unsupported_scheme",
            ViolationType::DomainNotAllowed => "domain_not_allowed",
            ViolationType::TooLong => "too_long",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationRejection {
    pub violation_type: ViolationType,
    pub reason: String,
}

impl std::fmt::Display for ValidationRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.violation_type.as_str(), self.reason)
    }
}

/// A minimal scheme/host split, since nothing in the dependency stack otherwise needs a
/// full URL-parsing crate. Returns `None` if the string has no `scheme://host` shape.
struct ParsedUrl<'a> {
    scheme: &'a str,
    host: &'a str,
}

fn parse_url(url: &str) -> Option<ParsedUrl<'_>> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }
    let after_scheme = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = after_scheme.rsplit_once('@').map_or(after_scheme, |(_, h)| h);
    let host = host.split(':').next().unwrap_or("");
    Some(ParsedUrl { scheme, host })
}

/// Runs the §4.1 rule chain, in order, against one element source URL.
pub fn validate(url: &str, domain_allowlist: &[String]) -> Result<(), ValidationRejection> {
    if url.is_empty() {
        return reject(ViolationType::Empty, "url is empty", url);
    }

    let lowered = url.to_lowercase();
    if FORBIDDEN_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return reject(ViolationType::ForbiddenProtocol, "forbidden protocol prefix", url);
    }

    if url.chars().any(|c| FORBIDDEN_CHARS.contains(&c))
        || FORBIDDEN_SEQUENCES.iter().any(|s| url.contains(s))
    {
        return reject(
            ViolationType::ForbiddenCharacters,
            "contains shell metacharacters or path traversal",
            url,
        );
    }

    let parsed = match parse_url(url) {
        Some(p) => p,
        None => return reject(ViolationType::UnparsableUrl, "could not parse scheme/host", url),
    };

    if parsed.host.is_empty() {
        return reject(ViolationType::EmptyHost, "host is empty", url);
    }

    if parsed.scheme != "http" && parsed.scheme != "https" {
        return reject(
            ViolationType::UnsupportedScheme,
            "scheme must be http or https",
            url,
        );
    }

    if !domain_allowlist.is_empty() && !domain_allowlist.iter().any(|d| d == parsed.host) {
        return reject(ViolationType::DomainNotAllowed, "host not in allowlist", url);
    }

    if url.len() > MAX_URL_LEN {
        return reject(ViolationType::TooLong, "url exceeds maximum length", url);
    }

    Ok(())
}

fn reject(violation_type: ViolationType, reason: &str, url: &str) -> Result<(), ValidationRejection> {
    warn!(target: "security", url, violation_type = violation_type.as_str(), reason, "rejected url");
    Err(ValidationRejection {
        violation_type,
        reason: reason.to_string(),
    })
}

/// Sanitizes a raw command-argument token (not a URL): strips forbidden characters and
/// traversal sequences, keeps only the first whitespace-separated token, and rejects known
/// dangerous command names.
pub fn sanitize(input: &str) -> Option<String> {
    let mut cleaned: String = input
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c))
        .collect();
    for seq in FORBIDDEN_SEQUENCES {
        cleaned = cleaned.replace(seq, "");
    }

    let token = cleaned.split_whitespace().next().unwrap_or("");
    if token.is_empty() {
        return None;
    }
    if DANGEROUS_COMMANDS.contains(&token.to_lowercase().as_str()) {
        return None;
    }
    Some(token.to_string())
}
