//! Safe HTML rendering for the OAuth error page.
//!
//! Upstream error text is entity-escaped before it reaches a page.
//! Provider-supplied "additional info" may carry markup; it runs through
//! an allowlist sanitizer with a fixed tag set and http/https-only URIs.

use std::borrow::Cow;

/// Tags allowed through the sanitizer.
const ALLOWED_TAGS: &[&str] = &["b", "i", "em", "strong", "p", "br", "a", "code"];

/// Escape HTML entities.
#[must_use]
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Sanitize markup down to the allowlist.
///
/// Escapes everything, then re-enables the allowed bare tags and `<a>`
/// elements whose `href` is http or https. Anything else stays escaped
/// text.
#[must_use]
pub fn sanitize(input: &str) -> String {
    let mut out = escape(input);
    for tag in ALLOWED_TAGS {
        if *tag == "a" {
            continue;
        }
        out = out
            .replace(&format!("&lt;{tag}&gt;"), &format!("<{tag}>"))
            .replace(&format!("&lt;/{tag}&gt;"), &format!("</{tag}>"));
    }
    restore_safe_anchors(&out).into_owned()
}

/// Re-enable `<a href="http(s)://…">` anchors from their escaped form.
fn restore_safe_anchors(input: &str) -> Cow<'_, str> {
    const OPEN: &str = "&lt;a href=&quot;";
    const OPEN_END: &str = "&quot;&gt;";
    const CLOSE: &str = "&lt;/a&gt;";

    if !input.contains(OPEN) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let Some(href_end) = after_open.find(OPEN_END) else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let href = &after_open[..href_end];
        let tail = &after_open[href_end + OPEN_END.len()..];
        if href.starts_with("https://") || href.starts_with("http://") {
            out.push_str(&format!("<a href=\"{href}\">"));
            rest = tail;
        } else {
            // Keep the escaped form for unsafe schemes.
            out.push_str(OPEN);
            out.push_str(href);
            out.push_str(OPEN_END);
            rest = tail;
        }
    }
    out.push_str(rest);
    Cow::Owned(out.replace(CLOSE, "</a>"))
}

/// Render the sanitized OAuth error page.
#[must_use]
pub fn error_page(title: &str, message: &str, detail: Option<&str>) -> String {
    let detail_html = detail
        .map(|d| format!("<p class=\"detail\">{}</p>", sanitize(d)))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n\
         <body>\n<h1>{}</h1>\n<p>{}</p>\n{}\n<p><a href=\"/auth/login\">Try again</a></p>\n</body>\n</html>\n",
        escape(title),
        escape(title),
        escape(message),
        detail_html,
    )
}

/// The `/test` landing page, target of the cookie-only login flow.
#[must_use]
pub fn test_page() -> String {
    "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Waygate</title></head>\n\
     <body>\n<h1>Signed in</h1>\n<p>Your session is active. Issue an API token via \
     <code>POST /api/generate-token</code>.</p>\n</body>\n</html>\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_entities() {
        assert_eq!(
            escape(r#"<script>alert("x&y")</script>"#),
            "&lt;script&gt;alert(&quot;x&amp;y&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn sanitize_allows_basic_tags() {
        assert_eq!(sanitize("<b>bold</b> and <em>em</em>"), "<b>bold</b> and <em>em</em>");
    }

    #[test]
    fn sanitize_strips_script() {
        let out = sanitize("<script>alert(1)</script>");
        assert!(!out.contains("<script>"));
        assert!(out.contains("&lt;script&gt;"));
    }

    #[test]
    fn sanitize_allows_https_anchor() {
        let out = sanitize(r#"<a href="https://example.com/help">help</a>"#);
        assert_eq!(out, r#"<a href="https://example.com/help">help</a>"#);
    }

    #[test]
    fn sanitize_blocks_javascript_uri() {
        let out = sanitize(r#"<a href="javascript:alert(1)">x</a>"#);
        assert!(!out.contains(r#"<a href="javascript"#));
        assert!(out.contains("&lt;a href="));
    }

    #[test]
    fn sanitize_keeps_tag_attributes_escaped() {
        let out = sanitize(r#"<b onclick="evil()">x</b>"#);
        // Attribute-carrying tags are not on the bare-tag allowlist.
        assert!(!out.contains("onclick=\"evil"));
        assert!(out.contains("&lt;b onclick"));
    }

    #[test]
    fn error_page_escapes_message() {
        let page = error_page("OAuth error", "<img src=x onerror=alert(1)>", None);
        assert!(!page.contains("<img"));
        assert!(page.contains("&lt;img"));
    }

    #[test]
    fn error_page_sanitizes_detail() {
        let page = error_page(
            "OAuth error",
            "denied",
            Some(r#"See <a href="https://support.example">support</a>"#),
        );
        assert!(page.contains(r#"<a href="https://support.example">support</a>"#));
    }

    #[test]
    fn test_page_is_html() {
        let page = test_page();
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("/api/generate-token"));
    }
}
