//! Log redaction helpers.
//!
//! Bearer tokens, upstream OAuth tokens, authorization codes, and
//! encryption keys are never logged whole — only a short prefix or a hash
//! fingerprint. Emails are logged with a masked local part.

use sha2::{Digest, Sha256};

/// Visible prefix length for masked secrets.
const PREFIX_LEN: usize = 8;

/// Mask a token or authorization code down to its first eight characters.
#[must_use]
pub fn mask_token(token: &str) -> String {
    if token.len() <= PREFIX_LEN {
        return "***".to_string();
    }
    let prefix: String = token.chars().take(PREFIX_LEN).collect();
    format!("{prefix}***")
}

/// Mask an email's local part: `user@example.com` → `u***@example.com`.
#[must_use]
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap_or('*');
            format!("{first}***@{domain}")
        }
        _ => "***".to_string(),
    }
}

/// Short SHA-256 fingerprint of key material, safe to log.
#[must_use]
pub fn key_fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex.chars().take(PREFIX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_token_keeps_prefix() {
        let masked = mask_token("11111111-2222-3333-4444-555555555555");
        assert_eq!(masked, "11111111***");
    }

    #[test]
    fn mask_short_token_entirely() {
        assert_eq!(mask_token("abc"), "***");
        assert_eq!(mask_token("12345678"), "***");
    }

    #[test]
    fn mask_email_local_part() {
        assert_eq!(mask_email("user@example.com"), "u***@example.com");
        assert_eq!(mask_email("a@b.io"), "a***@b.io");
    }

    #[test]
    fn mask_email_garbage() {
        assert_eq!(mask_email("not-an-email"), "***");
        assert_eq!(mask_email("@nodomain"), "***");
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let fp1 = key_fingerprint(b"0123456789abcdef0123456789abcdef");
        let fp2 = key_fingerprint(b"0123456789abcdef0123456789abcdef");
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 8);
    }

    #[test]
    fn fingerprint_differs_per_key() {
        assert_ne!(key_fingerprint(b"key-a"), key_fingerprint(b"key-b"));
    }
}
