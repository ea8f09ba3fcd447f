//! Best-effort user-agent parsing.
//!
//! [`parse_user_agent`] never fails: anything it cannot recognise is reported
//! as [`UNKNOWN`] (device type `unknown`).

use crate::models::{DeviceInfo, UNKNOWN};

const BOT_MARKERS: &[&str] = &[
    "bot", "crawler", "spider", "slurp", "curl/", "wget/", "python-requests", "headless",
];

/// Browser markers, most specific first: Edge and Opera also carry `Chrome/`,
/// Chrome also carries `Safari/`.
const BROWSERS: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("EdgA/", "Edge"),
    ("EdgiOS/", "Edge"),
    ("Edge/", "Edge"),
    ("OPR/", "Opera"),
    ("SamsungBrowser/", "Samsung Internet"),
    ("Firefox/", "Firefox"),
    ("FxiOS/", "Firefox"),
    ("CriOS/", "Chrome"),
    ("Chrome/", "Chrome"),
    ("curl/", "curl"),
];

pub fn parse_user_agent(user_agent: &str) -> DeviceInfo {
    let ua = user_agent.trim();
    if ua.is_empty() {
        return DeviceInfo::default();
    }

    let (browser, browser_version) = detect_browser(ua);
    let (os, os_version) = detect_os(ua);
    let device_type = detect_device_type(ua, &os);

    DeviceInfo {
        browser: browser.to_string(),
        browser_version: browser_version.unwrap_or_else(|| UNKNOWN.to_string()),
        os: os.to_string(),
        os_version: os_version.unwrap_or_else(|| UNKNOWN.to_string()),
        device_type: device_type.to_string(),
    }
}

fn detect_browser(ua: &str) -> (&'static str, Option<String>) {
    for (marker, name) in BROWSERS {
        if ua.contains(marker) {
            return (name, version_after(ua, marker).map(major));
        }
    }
    if ua.contains("Safari/") {
        return ("Safari", version_after(ua, "Version/").map(major));
    }
    if ua.contains("MSIE ") {
        return ("Internet Explorer", version_after(ua, "MSIE ").map(major));
    }
    if ua.contains("Trident/") {
        return ("Internet Explorer", version_after(ua, "rv:").map(major));
    }
    (UNKNOWN, None)
}

fn detect_os(ua: &str) -> (&'static str, Option<String>) {
    if let Some(nt) = version_after(ua, "Windows NT ") {
        let version = match nt.as_str() {
            "10.0" => "10".to_string(),
            "6.3" => "8.1".to_string(),
            "6.2" => "8".to_string(),
            "6.1" => "7".to_string(),
            other => other.to_string(),
        };
        return ("Windows", Some(version));
    }
    if ua.contains("Windows") {
        return ("Windows", None);
    }
    if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        let version = version_after(ua, "iPhone OS ").or_else(|| version_after(ua, "CPU OS "));
        return ("iOS", version);
    }
    if ua.contains("Android") {
        return ("Android", version_after(ua, "Android "));
    }
    if ua.contains("CrOS") {
        return ("Chrome OS", None);
    }
    if ua.contains("Mac OS X") {
        return ("macOS", version_after(ua, "Mac OS X "));
    }
    if ua.contains("Linux") {
        return ("Linux", None);
    }
    (UNKNOWN, None)
}

fn detect_device_type(ua: &str, os: &str) -> &'static str {
    let lower = ua.to_ascii_lowercase();
    if BOT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return "bot";
    }
    if ua.contains("iPad") || ua.contains("Tablet") || (os == "Android" && !ua.contains("Mobile"))
    {
        return "tablet";
    }
    if ua.contains("Mobi") || ua.contains("iPhone") || ua.contains("iPod") {
        return "mobile";
    }
    match os {
        "Windows" | "macOS" | "Linux" | "Chrome OS" => "desktop",
        _ => "unknown",
    }
}

/// Version token directly following `marker`, with `_` separators normalised to `.`.
fn version_after(ua: &str, marker: &str) -> Option<String> {
    let start = ua.find(marker)? + marker.len();
    let version: String = ua[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '_')
        .map(|c| if c == '_' { '.' } else { c })
        .collect();
    let version = version.trim_end_matches('.').to_string();
    (!version.is_empty()).then_some(version)
}

fn major(version: String) -> String {
    match version.split_once('.') {
        Some((major, _)) => major.to_string(),
        None => version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_on_windows() {
        let info = parse_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.6099.109 Safari/537.36",
        );
        assert_eq!(info.browser, "Chrome");
        assert_eq!(info.browser_version, "120");
        assert_eq!(info.os, "Windows");
        assert_eq!(info.os_version, "10");
        assert_eq!(info.device_type, "desktop");
    }

    #[test]
    fn test_safari_on_iphone() {
        let info = parse_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1_2 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.1.2 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(info.browser, "Safari");
        assert_eq!(info.browser_version, "17");
        assert_eq!(info.os, "iOS");
        assert_eq!(info.os_version, "17.1.2");
        assert_eq!(info.device_type, "mobile");
    }

    #[test]
    fn test_edge_is_not_reported_as_chrome() {
        let info = parse_user_agent(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.2151.97",
        );
        assert_eq!(info.browser, "Edge");
        assert_eq!(info.browser_version, "119");
        assert_eq!(info.os, "macOS");
        assert_eq!(info.os_version, "10.15.7");
        assert_eq!(info.device_type, "desktop");
    }

    #[test]
    fn test_android_tablet_and_phone() {
        let tablet = parse_user_agent(
            "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
        );
        assert_eq!(tablet.os, "Android");
        assert_eq!(tablet.os_version, "13");
        assert_eq!(tablet.device_type, "tablet");

        let phone = parse_user_agent(
            "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
        );
        assert_eq!(phone.device_type, "mobile");
    }

    #[test]
    fn test_firefox_on_linux() {
        let info = parse_user_agent(
            "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
        );
        assert_eq!(info.browser, "Firefox");
        assert_eq!(info.browser_version, "121");
        assert_eq!(info.os, "Linux");
        assert_eq!(info.os_version, UNKNOWN);
        assert_eq!(info.device_type, "desktop");
    }

    #[test]
    fn test_bots_and_tools() {
        let bot = parse_user_agent(
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
        );
        assert_eq!(bot.device_type, "bot");

        let curl = parse_user_agent("curl/8.4.0");
        assert_eq!(curl.browser, "curl");
        assert_eq!(curl.browser_version, "8");
        assert_eq!(curl.device_type, "bot");
    }

    #[test]
    fn test_garbage_falls_back_to_unknown() {
        assert_eq!(parse_user_agent(""), DeviceInfo::default());

        let info = parse_user_agent("totally not a browser");
        assert_eq!(info.browser, UNKNOWN);
        assert_eq!(info.browser_version, UNKNOWN);
        assert_eq!(info.os, UNKNOWN);
        assert_eq!(info.os_version, UNKNOWN);
        assert_eq!(info.device_type, "unknown");
    }
}
