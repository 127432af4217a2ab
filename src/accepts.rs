//! Content negotiation over the `Accept*` request headers.
//!
//! Parsed once when the context is built; every lookup afterwards is a scan
//! over a handful of preferences.

use http::HeaderMap;
use http::header::{ACCEPT, ACCEPT_CHARSET, ACCEPT_ENCODING, ACCEPT_LANGUAGE};

/// One entry of an `Accept*` header.
#[derive(Clone, Debug, PartialEq)]
struct Preference {
    value: String,
    q: f32,
    order: usize,
}

/// Negotiation handle computed from a request's headers.
///
/// Each method takes the values the server can produce and returns the one
/// the client prefers, or `None` when nothing offered is acceptable. An
/// absent header accepts anything, so the first offer wins.
#[derive(Clone, Debug, Default)]
pub struct Accepts {
    types: Option<Vec<Preference>>,
    encodings: Option<Vec<Preference>>,
    charsets: Option<Vec<Preference>>,
    languages: Option<Vec<Preference>>,
}

impl Accepts {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let parse = |name| {
            let joined = headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(",");
            (!joined.is_empty()).then(|| parse_header(&joined))
        };
        Self {
            types: parse(ACCEPT),
            encodings: parse(ACCEPT_ENCODING),
            charsets: parse(ACCEPT_CHARSET),
            languages: parse(ACCEPT_LANGUAGE),
        }
    }

    /// Best media type among `offered`. Shorthands such as `"json"` or
    /// `"html"` are accepted; the offer is returned exactly as given.
    ///
    /// ```rust
    /// use http::{HeaderMap, HeaderValue, header::ACCEPT};
    /// use strata::Accepts;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert(ACCEPT, HeaderValue::from_static("text/html, application/json;q=0.5"));
    /// let accepts = Accepts::from_headers(&headers);
    /// assert_eq!(accepts.types(&["json", "html"]).as_deref(), Some("html"));
    /// ```
    pub fn types(&self, offered: &[&str]) -> Option<String> {
        negotiate(self.types.as_deref(), offered, |pref, offer| {
            media_specificity(pref, &expand_type(offer))
        })
    }

    pub fn encodings(&self, offered: &[&str]) -> Option<String> {
        // identity stays acceptable unless the client rules it out
        let implicit_identity;
        let prefs = match self.encodings.as_deref() {
            Some(prefs) if !prefs.iter().any(|p| p.value == "identity" || p.value == "*") => {
                let mut prefs = prefs.to_vec();
                prefs.push(Preference { value: "identity".to_owned(), q: 0.001, order: prefs.len() });
                implicit_identity = prefs;
                Some(implicit_identity.as_slice())
            }
            other => other,
        };
        negotiate(prefs, offered, |pref, offer| token_specificity(pref, offer))
    }

    pub fn charsets(&self, offered: &[&str]) -> Option<String> {
        negotiate(self.charsets.as_deref(), offered, |pref, offer| token_specificity(pref, offer))
    }

    pub fn languages(&self, offered: &[&str]) -> Option<String> {
        negotiate(self.languages.as_deref(), offered, |pref, offer| {
            let offer = offer.to_ascii_lowercase();
            if pref == "*" {
                Some(0)
            } else if pref == offer {
                Some(2)
            } else if offer.starts_with(pref) && offer.as_bytes().get(pref.len()) == Some(&b'-') {
                Some(1)
            } else {
                None
            }
        })
    }

    /// Every accepted media type, most preferred first.
    pub fn all_types(&self) -> Vec<String> {
        ranked(self.types.as_deref())
    }

    pub fn all_encodings(&self) -> Vec<String> {
        ranked(self.encodings.as_deref())
    }

    pub fn all_charsets(&self) -> Vec<String> {
        ranked(self.charsets.as_deref())
    }

    pub fn all_languages(&self) -> Vec<String> {
        ranked(self.languages.as_deref())
    }
}

/// Maps a shorthand like `"json"` to its full media type.
pub(crate) fn expand_type(value: &str) -> String {
    if value.contains('/') {
        return value.to_ascii_lowercase();
    }
    let full = match value.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "text" | "txt" => "text/plain",
        "xml" => "application/xml",
        "csv" => "text/csv",
        "css" => "text/css",
        "js" => "application/javascript",
        "form" | "urlencoded" => "application/x-www-form-urlencoded",
        "bin" | "binary" => "application/octet-stream",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "msgpack" => "application/msgpack",
        "event-stream" | "sse" => "text/event-stream",
        _ => return value.to_ascii_lowercase(),
    };
    full.to_owned()
}

fn parse_header(raw: &str) -> Vec<Preference> {
    raw.split(',')
        .enumerate()
        .filter_map(|(order, entry)| {
            let mut parts = entry.split(';');
            let value = parts.next()?.trim().to_ascii_lowercase();
            if value.is_empty() {
                return None;
            }
            let q = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            Some(Preference { value, q, order })
        })
        .collect()
}

fn media_specificity(pref: &str, offer: &str) -> Option<u8> {
    let (pref_type, pref_sub) = pref.split_once('/')?;
    let (offer_type, offer_sub) = offer.split_once('/')?;
    if pref_type == "*" && pref_sub == "*" {
        return Some(0);
    }
    if pref_type != offer_type {
        return None;
    }
    if pref_sub == "*" {
        Some(1)
    } else if pref_sub == offer_sub {
        Some(2)
    } else {
        None
    }
}

fn token_specificity(pref: &str, offer: &str) -> Option<u8> {
    if pref == "*" {
        Some(0)
    } else if pref.eq_ignore_ascii_case(offer) {
        Some(1)
    } else {
        None
    }
}

/// Picks the offer with the highest q, then the most specific match, then
/// the earliest header position, then the earliest offer.
fn negotiate<F>(prefs: Option<&[Preference]>, offered: &[&str], matches: F) -> Option<String>
where
    F: Fn(&str, &str) -> Option<u8>,
{
    let Some(prefs) = prefs else {
        return offered.first().map(|s| (*s).to_owned());
    };

    let mut best: Option<(f32, u8, usize, usize)> = None;
    for (index, offer) in offered.iter().enumerate() {
        // the most specific matching preference decides this offer's q
        let Some(pref) = prefs
            .iter()
            .filter_map(|p| matches(&p.value, offer).map(|s| (s, p)))
            .max_by(|(a, pa), (b, pb)| a.cmp(b).then(pb.order.cmp(&pa.order)))
        else {
            continue;
        };
        let (specificity, pref) = pref;
        if pref.q <= 0.0 {
            continue;
        }
        let candidate = (pref.q, specificity, pref.order, index);
        let better = match best {
            None => true,
            Some((q, s, order, _)) => {
                pref.q > q || (pref.q == q && (specificity > s || (specificity == s && pref.order < order)))
            }
        };
        if better {
            best = Some(candidate);
        }
    }
    best.map(|(_, _, _, index)| offered[index].to_owned())
}

fn ranked(prefs: Option<&[Preference]>) -> Vec<String> {
    let Some(prefs) = prefs else {
        return Vec::new();
    };
    let mut prefs: Vec<_> = prefs.iter().filter(|p| p.q > 0.0).collect();
    prefs.sort_by(|a, b| b.q.total_cmp(&a.q).then(a.order.cmp(&b.order)));
    prefs.into_iter().map(|p| p.value.clone()).collect()
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn accepts(name: http::header::HeaderName, value: &'static str) -> Accepts {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        Accepts::from_headers(&headers)
    }

    #[test]
    fn missing_header_accepts_the_first_offer() {
        let a = Accepts::default();
        assert_eq!(a.types(&["json", "html"]).as_deref(), Some("json"));
        assert_eq!(a.types(&[]), None);
        assert!(a.all_types().is_empty());
    }

    #[test]
    fn q_values_rank_types() {
        let a = accepts(ACCEPT, "application/json;q=0.4, text/html");
        assert_eq!(a.types(&["json", "html"]).as_deref(), Some("html"));
        assert_eq!(a.all_types(), vec!["text/html", "application/json"]);
    }

    #[test]
    fn wildcards_match_but_lose_to_exact_types() {
        let a = accepts(ACCEPT, "text/*, application/json");
        assert_eq!(a.types(&["text/plain"]).as_deref(), Some("text/plain"));
        assert_eq!(a.types(&["text/plain", "application/json"]).as_deref(), Some("application/json"));
        assert_eq!(a.types(&["image/png"]), None);
    }

    #[test]
    fn q_zero_rejects() {
        let a = accepts(ACCEPT, "*/*, application/xml;q=0");
        assert_eq!(a.types(&["xml"]), None);
        assert_eq!(a.types(&["xml", "json"]).as_deref(), Some("json"));
    }

    #[test]
    fn identity_encoding_is_implicit() {
        let a = accepts(ACCEPT_ENCODING, "gzip");
        assert_eq!(a.encodings(&["br", "identity"]).as_deref(), Some("identity"));
        assert_eq!(a.encodings(&["identity", "gzip"]).as_deref(), Some("gzip"));
    }

    #[test]
    fn language_prefixes_match_regions() {
        let a = accepts(ACCEPT_LANGUAGE, "en;q=0.8, fr");
        assert_eq!(a.languages(&["en-US", "de"]).as_deref(), Some("en-US"));
        assert_eq!(a.languages(&["en-US", "fr"]).as_deref(), Some("fr"));
        assert_eq!(a.languages(&["de"]), None);
    }

    #[test]
    fn charsets_are_case_insensitive() {
        let a = accepts(ACCEPT_CHARSET, "UTF-8");
        assert_eq!(a.charsets(&["utf-8"]).as_deref(), Some("utf-8"));
    }

    #[test]
    fn shorthands_expand() {
        assert_eq!(expand_type("json"), "application/json");
        assert_eq!(expand_type(".html"), "text/html");
        assert_eq!(expand_type("image/webp"), "image/webp");
    }
}
