//! Session cookie credentials.

use std::collections::HashMap;

/// Cookie names the client reads.
pub mod names {
    pub const SESSDATA: &str = "SESSDATA";
    pub const BILI_JCT: &str = "bili_jct";
    pub const DEDE_USER_ID: &str = "DedeUserID";
    pub const BUVID3: &str = "buvid3";
}

/// A parsed `Cookie` header.
///
/// The raw string is kept for header injection; named fields are looked up on
/// demand.
#[derive(Clone, Default)]
pub struct Credentials {
    raw: String,
    cookies: HashMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.cookies.keys().collect();
        names.sort();
        f.debug_struct("Credentials")
            .field("cookies", &names)
            .finish()
    }
}

impl Credentials {
    /// Parse a `name=value; name=value` cookie string.
    ///
    /// Empty parts, parts without `=`, and empty names or values are skipped.
    /// The first occurrence of a name wins.
    pub fn parse(input: &str) -> Self {
        let mut cookies = HashMap::new();
        for (name, value) in parse_cookie_header(input) {
            cookies.entry(name).or_insert(value);
        }
        Self {
            raw: input.trim().to_string(),
            cookies,
        }
    }

    /// The cookie string as given, for the `Cookie` header.
    pub fn header_value(&self) -> &str {
        &self.raw
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// CSRF token required by write endpoints.
    pub fn csrf(&self) -> Option<&str> {
        self.get(names::BILI_JCT)
    }

    pub fn sessdata(&self) -> Option<&str> {
        self.get(names::SESSDATA)
    }

    /// Numeric user id claimed by the cookie, if well-formed.
    pub fn user_id(&self) -> Option<u64> {
        self.get(names::DEDE_USER_ID)?.parse().ok()
    }

    /// Client instance id: the `buvid3` cookie or a freshly generated one.
    pub fn buvid3_or_generate(&self) -> String {
        self.get(names::BUVID3)
            .map(ToString::to_string)
            .unwrap_or_else(generate_fake_buvid3)
    }
}

fn parse_cookie_header(input: &str) -> Vec<(String, String)> {
    input
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }

            let mut kv = part.splitn(2, '=');
            let name = kv.next()?.trim();
            let value = kv.next()?.trim();
            if name.is_empty() || value.is_empty() {
                return None;
            }

            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Generates a fake BUVID3 identifier.
///
/// A v4 UUID, uppercased without hyphens, re-grouped as
/// `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXXinfoc`.
pub fn generate_fake_buvid3() -> String {
    let u = uuid::Uuid::new_v4();
    let u_str = u.to_string().to_uppercase().replace('-', "");
    format!(
        "{}-{}-{}-{}-{}infoc",
        &u_str[0..8],
        &u_str[8..12],
        &u_str[12..16],
        &u_str[16..20],
        &u_str[20..]
    )
}
