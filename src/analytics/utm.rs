//! UTM attribution extraction.

use url::{form_urlencoded, Url};

use crate::models::UtmParams;

/// Collect `utm_source`, `utm_medium` and `utm_campaign`.
///
/// The redirect request's own query string wins; fields it lacks are taken
/// from the referrer's query string. Empty values count as absent.
pub fn extract_utm(request_query: Option<&str>, referrer: &str) -> UtmParams {
    let mut utm = UtmParams::default();

    if let Some(query) = request_query {
        fill_from_pairs(&mut utm, form_urlencoded::parse(query.as_bytes()));
    }

    if utm.source.is_none() || utm.medium.is_none() || utm.campaign.is_none() {
        if let Ok(referrer_url) = Url::parse(referrer) {
            fill_from_pairs(&mut utm, referrer_url.query_pairs());
        }
    }

    utm
}

fn fill_from_pairs<'a>(
    utm: &mut UtmParams,
    pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
) {
    for (key, value) in pairs {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = match &*key {
            "utm_source" => &mut utm.source,
            "utm_medium" => &mut utm.medium,
            "utm_campaign" => &mut utm.campaign,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
}
