//! Sender allowlist for the mail monitor.

/// How one allowlist entry matches a sender.
enum Entry<'a> {
    Anyone,
    Domain(&'a str),
    Address(&'a str),
}

fn entry(raw: &str) -> Option<Entry<'_>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw == "*" {
        return Some(Entry::Anyone);
    }
    Some(match raw.split_once('@') {
        Some(("", domain)) => Entry::Domain(domain),
        Some(_) => Entry::Address(raw),
        None => Entry::Domain(raw),
    })
}

/// Whether `sender` may file bug reports.
///
/// Entries are trimmed and compared case-insensitively. `*` admits anyone,
/// `@example.com` and `example.com` admit that exact domain, anything else
/// with an `@` is a full address. An empty list (or one with only blank
/// entries) admits nobody.
pub fn is_sender_allowed(allowed: &[String], sender: &str) -> bool {
    let sender = sender.trim();
    let sender_domain = sender.rsplit_once('@').map(|(_, domain)| domain);

    allowed.iter().filter_map(|raw| entry(raw)).any(|e| match e {
        Entry::Anyone => true,
        Entry::Address(address) => address.eq_ignore_ascii_case(sender),
        Entry::Domain(domain) => sender_domain.is_some_and(|d| d.eq_ignore_ascii_case(domain)),
    })
}
