//! Response fragment parsing
//!
//! Turns the raw fragment an authorization server redirects back with
//! (`#id_token=...&state=...`, optionally behind a `#/` route anchor) into a
//! flat parameter map. Parsing is total: malformed input degrades to a partial
//! or empty map, and deciding whether the map is usable is left to the
//! classifier.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;

use crate::constants::AUTH_RESPONSE_KEYS;

/// Decoded response parameters. Last occurrence of a key wins.
pub type Parameters = HashMap<String, String>;

/// Parse a response fragment into its parameters.
///
/// Segments without `=` or with an empty key are skipped. Values may contain
/// `=`; only the first one splits key from value.
pub fn parse(fragment: &str) -> Parameters {
    let mut parameters = Parameters::new();
    for segment in strip_anchor(fragment).split('&') {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let key = decode(key);
        if key.is_empty() {
            continue;
        }
        parameters.insert(key, decode(value));
    }
    parameters
}

/// Whether the parameters look like an authorization response at all.
pub fn is_auth_response(parameters: &Parameters) -> bool {
    AUTH_RESPONSE_KEYS
        .iter()
        .any(|key| parameters.contains_key(*key))
}

/// Whether a raw fragment should be handled as an auth completion.
pub fn is_callback(fragment: &str) -> bool {
    is_auth_response(&parse(fragment))
}

/// Strip a `#/` route anchor (and anything before it) or a leading `#`.
fn strip_anchor(fragment: &str) -> &str {
    if let Some(idx) = fragment.find("#/") {
        &fragment[idx + 2..]
    } else if let Some(rest) = fragment.strip_prefix('#') {
        rest
    } else {
        fragment
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
