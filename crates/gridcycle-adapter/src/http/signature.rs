/*
[INPUT]:  Query parameters and the account's API secret
[OUTPUT]: Signed query strings (HMAC-SHA256, hex) plus timestamp helpers
[POS]:    HTTP layer - request signing for authenticated endpoints
[UPDATE]: When the signing algorithm or parameter format changes
*/

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Current unix timestamp in milliseconds, as the venue expects.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Encode parameters as `k=v&k=v`, the exact byte string that gets signed.
pub fn to_query_string(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign a query string with the account secret. Returns the hex signature.
pub fn sign_query(secret: &str, query: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Append `timestamp` and `signature` to a parameter list, in place.
pub fn sign_params(secret: &str, params: &mut Vec<(String, String)>) {
    params.push(("timestamp".to_string(), timestamp_millis().to_string()));
    let signature = sign_query(secret, &to_query_string(params));
    params.push(("signature".to_string(), signature));
}
