//! The `ImageProxyRewriter` capability: replaces inline image
//! references in assistant markdown with signed proxy URLs before the
//! message is persisted, neutralizing untrusted-source images embedded in
//! model output.
//!
//! `rewrite` must be deterministic — the same markdown always produces the
//! same output — so finalization stays replayable. `HmacImageProxyRewriter`
//! signs each extracted URL with HMAC-SHA256 the same way the pack's
//! webhook-signature verifiers do (`hmac`/`sha2`, matching this crate's
//! existing `storage::idempotency::hash_args` hex-encoding convention), and
//! is the Core's default for tests and local development. A production
//! deployment's concrete proxy (storage, TTL, CDN) remains a collaborator.

use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub trait ImageProxyRewriter: Send + Sync {
    fn rewrite(&self, markdown: &str) -> String;
}

/// Rewrites `![alt](url)` markdown image references to `/images/proxy?sig=
/// <hmac>&url=<original>`. Deterministic for a fixed signing key.
pub struct HmacImageProxyRewriter {
    key: Vec<u8>,
    image_pattern: Regex,
}

impl HmacImageProxyRewriter {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            // Matches `![alt](url)`, capturing alt text and URL separately.
            image_pattern: Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)").unwrap(),
        }
    }

    fn sign(&self, url: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts a key of any length");
        mac.update(url.as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest.as_slice() {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl ImageProxyRewriter for HmacImageProxyRewriter {
    fn rewrite(&self, markdown: &str) -> String {
        self.image_pattern
            .replace_all(markdown, |caps: &regex::Captures| {
                let alt = &caps[1];
                let url = &caps[2];
                let sig = self.sign(url);
                format!(
                    "![{alt}](/images/proxy?sig={sig}&url={})",
                    urlencoding_minimal(url)
                )
            })
            .into_owned()
    }
}

/// Percent-encode only the characters that would otherwise break the query
/// string (`&`, `#`, whitespace) — deliberately minimal since the Core has
/// no dependency on a full URL-encoding crate beyond `url` itself, and the
/// proxy endpoint only needs the value to round-trip through one query arg.
fn urlencoding_minimal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("%26"),
            '#' => out.push_str("%23"),
            ' ' => out.push_str("%20"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_is_deterministic() {
        let rewriter = HmacImageProxyRewriter::new(b"test-key".to_vec());
        let input = "look at ![a cat](https://example.com/cat.png) here";
        let first = rewriter.rewrite(input);
        let second = rewriter.rewrite(input);
        assert_eq!(first, second);
        assert!(first.contains("/images/proxy?sig="));
    }

    #[test]
    fn text_without_images_is_unchanged() {
        let rewriter = HmacImageProxyRewriter::new(b"test-key".to_vec());
        let input = "no images here";
        assert_eq!(rewriter.rewrite(input), input);
    }
}
