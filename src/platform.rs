use url::Url;

/// Platforms in match order. A host matches a domain when it is the domain
/// itself or one of its subdomains.
const PLATFORMS: [(&[&str], &str); 8] = [
    (&["youtube.com", "youtu.be"], "YouTube"),
    (&["facebook.com", "fb.watch"], "Facebook"),
    (&["instagram.com"], "Instagram"),
    (&["tiktok.com"], "TikTok"),
    (&["twitter.com", "x.com"], "Twitter/X"),
    (&["snapchat.com"], "Snapchat"),
    (&["pinterest.com", "pin.it"], "Pinterest"),
    (&["likee.video", "likee.com"], "Likee"),
];

/// Returns the platform label for a URL, or `None` when the URL does not
/// parse or its host is not a known platform.
pub fn detect_platform(input: &str) -> Option<&'static str> {
    let parsed = Url::parse(input.trim()).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_ascii_lowercase();

    PLATFORMS
        .iter()
        .find(|(domains, _)| domains.iter().any(|domain| is_domain_match(&host, domain)))
        .map(|(_, label)| *label)
}

fn is_domain_match(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
