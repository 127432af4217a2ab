//! Cookie access, with optional HMAC signing.
//!
//! Signed cookies travel as two cookies: `name=value` and
//! `name.sig=<digest>`, where the digest is an HMAC-SHA256 of `name=value`
//! encoded as unpadded URL-safe base64. New signatures always use the first
//! key; verification accepts any key so keys can be rotated by prepending.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use http::header::{COOKIE, SET_COOKIE};
use sha2::Sha256;

use crate::context::Context;
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

// ── Keys ──────────────────────────────────────────────────────────────────────

/// An ordered set of signing keys. The first key signs.
#[derive(Clone, Default)]
pub struct Keys(Arc<Vec<Vec<u8>>>);

impl Keys {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        Self(Arc::new(keys.into_iter().map(|k| k.as_ref().to_vec()).collect()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Signs `data` with the first key. `None` when there are no keys.
    pub fn sign(&self, data: &str) -> Option<String> {
        let key = self.0.first()?;
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(data.as_bytes());
        Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Index of the key that produced `digest`, if any.
    pub fn verify(&self, data: &str, digest: &str) -> Option<usize> {
        let digest = URL_SAFE_NO_PAD.decode(digest).ok()?;
        self.0.iter().position(|key| {
            HmacSha256::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(data.as_bytes());
                    mac.verify_slice(&digest).is_ok()
                })
                .unwrap_or(false)
        })
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keys({} redacted)", self.0.len())
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// Attributes for [`Cookies::set`]. Defaults to `path=/; httponly`.
#[derive(Clone, Debug)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<Duration>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
    /// Also send a `name.sig` cookie. Requires application keys.
    pub signed: bool,
    /// Replace earlier `Set-Cookie` headers for the same name.
    pub overwrite: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: Some("/".to_owned()),
            domain: None,
            max_age: None,
            secure: false,
            http_only: true,
            same_site: None,
            signed: false,
            overwrite: false,
        }
    }
}

impl CookieOptions {
    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

// ── Jar ───────────────────────────────────────────────────────────────────────

/// Cookies sent by the client, parsed once when the context is created.
pub(crate) struct CookieJar {
    pairs: Vec<(String, String)>,
    keys: Keys,
}

impl CookieJar {
    pub(crate) fn from_headers(headers: &HeaderMap, keys: Keys) -> Self {
        let pairs = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let value = value.trim().trim_matches('"');
                Some((name.trim().to_owned(), value.to_owned()))
            })
            .collect();
        Self { pairs, keys }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.pairs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }
}

// ── Cookies ───────────────────────────────────────────────────────────────────

/// Cookie accessor for one exchange, obtained with [`Context::cookies`].
pub struct Cookies<'a> {
    ctx: &'a Context,
}

impl<'a> Cookies<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// The value the client sent for `name`, unverified.
    pub fn get(&self, name: &str) -> Option<String> {
        self.ctx.exchange.jar.get(name).map(str::to_owned)
    }

    /// The value for `name` if its `name.sig` companion verifies.
    ///
    /// A signature made with a rotated-out key is accepted and re-issued with
    /// the current key. A bad signature clears the `.sig` cookie. Fails with
    /// [`Error::Cookie`] when the application has no keys, leaving the
    /// client's cookies alone.
    pub fn get_signed(&self, name: &str) -> Result<Option<String>, Error> {
        let jar = &self.ctx.exchange.jar;
        if jar.keys.is_empty() {
            return Err(Error::Cookie("signed cookies require application keys".to_owned()));
        }
        let Some(value) = jar.get(name) else {
            return Ok(None);
        };
        let sig_name = format!("{name}.sig");
        let Some(digest) = jar.get(&sig_name) else {
            return Ok(None);
        };
        let data = format!("{name}={value}");

        match jar.keys.verify(&data, digest) {
            Some(0) => Ok(Some(value.to_owned())),
            Some(_) => {
                if let Some(fresh) = jar.keys.sign(&data) {
                    // a failed refresh does not invalidate the value
                    let _ = self.set(&sig_name, &fresh, CookieOptions::default());
                }
                Ok(Some(value.to_owned()))
            }
            None => {
                let _ = self.remove(&sig_name);
                Ok(None)
            }
        }
    }

    /// Appends a `Set-Cookie` header (two when signed).
    pub fn set(&self, name: &str, value: &str, options: CookieOptions) -> Result<(), Error> {
        validate(name)?;
        validate(value)?;

        let signature = if options.signed {
            let data = format!("{name}={value}");
            let digest = self
                .ctx
                .exchange
                .jar
                .keys
                .sign(&data)
                .ok_or_else(|| Error::Cookie("signed cookies require application keys".to_owned()))?;
            Some(digest)
        } else {
            None
        };

        self.push(name, &serialize(name, value, &options), options.overwrite)?;
        if let Some(digest) = signature {
            let sig_name = format!("{name}.sig");
            self.push(&sig_name, &serialize(&sig_name, &digest, &options), options.overwrite)?;
        }
        Ok(())
    }

    /// Expires `name` on the client.
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        let options = CookieOptions { max_age: Some(Duration::ZERO), overwrite: true, ..CookieOptions::default() };
        self.set(name, "", options)
    }

    fn push(&self, name: &str, line: &str, overwrite: bool) -> Result<(), Error> {
        let response = self.ctx.response();
        if overwrite {
            let prefix = format!("{name}=");
            let kept: Vec<String> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .filter(|v| !v.starts_with(&prefix))
                .map(str::to_owned)
                .collect();
            response.remove_header(SET_COOKIE.as_str());
            for line in kept {
                response.append_header(SET_COOKIE.as_str(), &line)?;
            }
        }
        response.append_header(SET_COOKIE.as_str(), line)
    }
}

fn validate(token: &str) -> Result<(), Error> {
    let bad = token
        .chars()
        .any(|c| c.is_control() || c.is_whitespace() || matches!(c, ';' | ',' | '"' | '\\'));
    if bad {
        return Err(Error::Cookie(format!("{token:?} contains a forbidden character")));
    }
    Ok(())
}

fn serialize(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut line = format!("{name}={value}");
    if let Some(path) = &options.path {
        line.push_str(&format!("; path={path}"));
    }
    if let Some(max_age) = options.max_age {
        line.push_str(&format!("; max-age={}", max_age.as_secs()));
        if max_age.is_zero() {
            line.push_str("; expires=Thu, 01 Jan 1970 00:00:00 GMT");
        }
    }
    if let Some(domain) = &options.domain {
        line.push_str(&format!("; domain={domain}"));
    }
    if let Some(same_site) = options.same_site {
        line.push_str(&format!("; samesite={}", same_site.as_str()));
    }
    if options.secure {
        line.push_str("; secure");
    }
    if options.http_only {
        line.push_str("; httponly");
    }
    line
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::Full;

    use super::*;
    use crate::application::Application;
    use crate::context::tests::context_for;

    fn with_cookie(app: &Application, cookie: &str) -> (Context, impl Sized + use<>) {
        let req = http::Request::builder()
            .uri("/")
            .header("cookie", cookie)
            .body(Full::new(Bytes::new()))
            .unwrap();
        context_for(app, req)
    }

    fn set_cookies(ctx: &Context) -> Vec<String> {
        ctx.response()
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect()
    }

    #[test]
    fn reads_request_cookies() {
        let app = Application::new();
        let (ctx, _rx) = with_cookie(&app, "a=1; b=\"two\"");
        assert_eq!(ctx.cookies().get("a").as_deref(), Some("1"));
        assert_eq!(ctx.cookies().get("b").as_deref(), Some("two"));
        assert_eq!(ctx.cookies().get("c"), None);
    }

    #[test]
    fn sets_cookies_with_attributes() {
        let app = Application::new();
        let (ctx, _rx) = with_cookie(&app, "");
        let options = CookieOptions::default()
            .max_age(Duration::from_secs(60))
            .same_site(SameSite::Lax);
        ctx.cookies().set("session", "abc", options).unwrap();
        assert_eq!(
            set_cookies(&ctx),
            vec!["session=abc; path=/; max-age=60; samesite=Lax; httponly"]
        );
    }

    #[test]
    fn signing_requires_keys() {
        let app = Application::new();
        let (ctx, _rx) = with_cookie(&app, "");
        let err = ctx.cookies().set("s", "v", CookieOptions::default().signed()).unwrap_err();
        assert!(matches!(err, Error::Cookie(_)));
    }

    #[test]
    fn signed_round_trip() {
        let keys = Keys::new(["secret"]);
        let digest = keys.sign("user=alice").unwrap();

        let app = Application::new().keys(["secret"]);
        let (ctx, _rx) = with_cookie(&app, &format!("user=alice; user.sig={digest}"));
        assert_eq!(ctx.cookies().get_signed("user").unwrap().as_deref(), Some("alice"));

        let (ctx, _rx) = with_cookie(&app, &format!("user=mallory; user.sig={digest}"));
        assert_eq!(ctx.cookies().get_signed("user").unwrap(), None);
        assert!(set_cookies(&ctx)[0].starts_with("user.sig=; path=/; max-age=0"));
    }

    #[test]
    fn rotated_keys_verify_and_reissue() {
        let old = Keys::new(["old"]).sign("user=alice").unwrap();
        let app = Application::new().keys(["new", "old"]);
        let (ctx, _rx) = with_cookie(&app, &format!("user=alice; user.sig={old}"));

        assert_eq!(ctx.cookies().get_signed("user").unwrap().as_deref(), Some("alice"));
        let fresh = Keys::new(["new"]).sign("user=alice").unwrap();
        assert!(set_cookies(&ctx)[0].starts_with(&format!("user.sig={fresh};")));
    }

    #[test]
    fn signed_reads_without_keys_fail_and_keep_the_signature() {
        let digest = Keys::new(["secret"]).sign("user=alice").unwrap();
        let app = Application::new();
        let (ctx, _rx) = with_cookie(&app, &format!("user=alice; user.sig={digest}"));

        assert!(matches!(ctx.cookies().get_signed("user"), Err(Error::Cookie(_))));
        assert!(set_cookies(&ctx).is_empty());
        assert_eq!(ctx.cookies().get("user.sig"), Some(digest));
    }

    #[test]
    fn signed_set_emits_two_cookies() {
        let app = Application::new().keys(["k"]);
        let (ctx, _rx) = with_cookie(&app, "");
        ctx.cookies().set("id", "42", CookieOptions::default().signed()).unwrap();
        let cookies = set_cookies(&ctx);
        assert_eq!(cookies.len(), 2);
        assert!(cookies[1].starts_with("id.sig="));
    }

    #[test]
    fn overwrite_replaces_earlier_headers() {
        let app = Application::new();
        let (ctx, _rx) = with_cookie(&app, "");
        ctx.cookies().set("a", "1", CookieOptions::default()).unwrap();
        ctx.cookies().set("b", "2", CookieOptions::default()).unwrap();
        let options = CookieOptions { overwrite: true, ..CookieOptions::default() };
        ctx.cookies().set("a", "3", options).unwrap();

        let cookies = set_cookies(&ctx);
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("b=2"));
        assert!(cookies[1].starts_with("a=3"));
    }

    #[test]
    fn forbidden_characters_are_rejected() {
        let app = Application::new();
        let (ctx, _rx) = with_cookie(&app, "");
        assert!(ctx.cookies().set("a", "x;y", CookieOptions::default()).is_err());
        assert!(ctx.cookies().set("a b", "x", CookieOptions::default()).is_err());
    }
}
