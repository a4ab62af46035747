//! WBI request signing.
//!
//! Some web endpoints require a `w_rid` parameter: the MD5 of the sorted query
//! string followed by a 32-character key mixed from two rotating key images.

use md5::{Digest, Md5};

/// Fallback key images, used when the identity response carries none.
pub const DEFAULT_IMG_URL: &str = "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png";
pub const DEFAULT_SUB_URL: &str = "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png";

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

const MIXIN_KEY_LEN: usize = 32;

/// Signing key material: the two key-image URLs published by the nav endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    img_url: String,
    sub_url: String,
}

impl Default for WbiKeys {
    fn default() -> Self {
        Self::new(DEFAULT_IMG_URL, DEFAULT_SUB_URL)
    }
}

impl WbiKeys {
    pub fn new(img_url: impl Into<String>, sub_url: impl Into<String>) -> Self {
        Self {
            img_url: img_url.into(),
            sub_url: sub_url.into(),
        }
    }

    /// Sign `params`, returning the lowercase hex `w_rid`.
    pub fn sign(&self, params: &[(&str, String)]) -> String {
        sign(params, &self.img_url, &self.sub_url)
    }
}

/// Key of a key-image URL: its file name without extension.
fn take_filename(url: &str) -> &str {
    let name = url.rsplit_once('/').map_or(url, |(_, s)| s);
    name.rsplit_once('.').map_or(name, |(s, _)| s)
}

// Characters are picked through the permutation table until 32 are collected;
// indices past the end of a short key pair are skipped.
fn get_mixin_key(img_key: &str, sub_key: &str) -> String {
    let orig: Vec<char> = img_key.chars().chain(sub_key.chars()).collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| orig.get(i))
        .take(MIXIN_KEY_LEN)
        .collect()
}

/// Compute the `w_rid` signature for `params`.
///
/// Parameter names are sorted, joined as `k=v&...` without further escaping,
/// suffixed with the mixed key and hashed with MD5.
pub fn sign(params: &[(&str, String)], img_url: &str, sub_url: &str) -> String {
    let mixin_key = get_mixin_key(take_filename(img_url), take_filename(sub_url));

    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let query = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(query.as_bytes());
    hasher.update(mixin_key.as_bytes());
    format!("{:x}", hasher.finalize())
}
