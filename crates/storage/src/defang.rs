//! Rendering of indicators that cannot be clicked or auto-linked.

/// `evil.example.com` -> `evil[.]example[.]com`
pub fn defang_host(host: &str) -> String {
    host.replace('.', "[.]")
}

/// Breaks both the scheme and every dot: `https://a.b/` -> `hxxps://a[.]b/`.
pub fn defang_url(url: &str) -> String {
    let url = url
        .replacen("http://", "hxxp://", 1)
        .replacen("https://", "hxxps://", 1);
    defang_host(&url)
}

/// Defanged hostname of `url`, if it has one.
pub fn defanged_domains(url: &str) -> Vec<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(defang_host))
        .into_iter()
        .collect()
}
