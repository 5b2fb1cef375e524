use std::collections::HashMap;

use url::Url;

pub(crate) const DEEPLINK_SCHEME: &str = "adbinapp";
pub(crate) const CONFIRM: &str = "confirm";
pub(crate) const CANCEL: &str = "cancel";

pub(crate) const PREVIEW_TOKEN: &str = "at_preview_token";
pub(crate) const PREVIEW_ENDPOINT: &str = "at_preview_endpoint";
pub(crate) const PREVIEW_PARAMETERS: &str = "at_preview_params";

pub const DEFAULT_PREVIEW_ENDPOINT: &str = "hal.testandtarget.omniture.com";

/// Raw (still percent-encoded) query pairs of a URL.
///
/// Pairs split on the first `=`; pairs with an empty key or an empty value
/// are skipped. Later duplicates overwrite earlier ones.
pub(crate) fn query_parameters(url: &Url) -> HashMap<String, String> {
    let Some(query) = url.query() else {
        return HashMap::new();
    };
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Decodes one layer of form encoding: `+` becomes a space, then `%XX`
/// escapes are resolved. `None` when the result is not UTF-8.
pub(crate) fn decode_once(value: &str) -> Option<String> {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .ok()
        .map(|decoded| decoded.into_owned())
}

pub(crate) fn parse_link(link: &str) -> Option<Url> {
    if link.trim().is_empty() {
        return None;
    }
    Url::parse(link).ok()
}

/// `https://{endpoint}/ui/admin[/{clientCode}]/preview[?token=...]`
pub(crate) fn preview_url(endpoint: &str, client_code: Option<&str>, token: Option<&str>) -> String {
    let mut url = format!("https://{endpoint}/ui/admin");
    if let Some(client_code) = client_code.filter(|code| !code.is_empty()) {
        url.push('/');
        url.push_str(&urlencoding::encode(client_code));
    }
    url.push_str("/preview");
    if let Some(token) = token.filter(|token| !token.is_empty()) {
        url.push_str("?token=");
        url.push_str(&urlencoding::encode(token));
    }
    url
}
