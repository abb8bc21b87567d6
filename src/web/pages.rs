//! Minimal HTML status pages for the redirect endpoint.

use crate::gate::ApprovalDecision;

/// Escape text for HTML element and attribute content
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; padding: 20px; max-width: 600px; margin: 0 auto; }}
        .success {{ color: #2e7d32; background: #e8f5e9; padding: 15px; border-radius: 4px; }}
        .error {{ color: #d32f2f; background: #ffebee; padding: 15px; border-radius: 4px; }}
        .endpoint {{ background: #f5f5f5; padding: 10px; margin: 5px 0; border-radius: 4px; }}
        .payload {{ background: #f5f5f5; padding: 10px; margin: 10px 0; font-family: monospace; word-break: break-all; }}
        code {{ background: #e1f5fe; padding: 2px 4px; border-radius: 2px; }}
    </style>
</head>
<body>
{body}
</body>
</html>"#,
        title = escape_html(title),
        body = body
    )
}

fn debug_block(summary: &str, content: &str) -> String {
    format!(
        r#"<details>
    <summary>{}</summary>
    <div class="payload"><pre><code>{}</code></pre></div>
</details>"#,
        escape_html(summary),
        escape_html(content)
    )
}

/// Page shown after a successful approval.
///
/// The debug section lists what was decrypted except the key itself.
pub fn render_success(decision: &ApprovalDecision, encrypted: &str) -> String {
    let greeting = match &decision.forum_username {
        Some(name) => format!("Verified as {}. Your join request was approved.", name),
        None => "Your join request was approved.".to_string(),
    };
    let details = serde_json::json!({
        "nonce": decision.nonce,
        "push": decision.push_enabled,
        "api": decision.api_identifier,
        "forum_username": decision.forum_username,
        "group_id": decision.group_id,
        "user_id": decision.user_id,
    });
    let details = serde_json::to_string_pretty(&details).unwrap_or_default();

    let body = format!(
        r#"<h1>Verification complete</h1>
<div class="success"><p>{}</p></div>
{}
{}"#,
        escape_html(&greeting),
        debug_block("Decrypted payload (debug)", &details),
        debug_block("Encrypted payload (debug)", encrypted)
    );
    layout("Verification complete", &body)
}

/// Page shown when a response could not be turned into an approval.
pub fn render_failure(reason: &str) -> String {
    let body = format!(
        r#"<h1>Verification failed</h1>
<div class="error"><p>{}</p></div>"#,
        escape_html(reason)
    );
    layout("Verification failed", &body)
}

pub fn render_index() -> String {
    let body = r#"<h1>🔐 Forum verification service</h1>

<h2>Endpoints</h2>
<div class="endpoint">
    <strong>GET /auth/:nonce</strong><br>
    Redirect target for the forum's User API key flow<br>
    <small>expects the encrypted <code>payload</code> query parameter</small>
</div>
<div class="endpoint">
    <strong>GET /health</strong><br>
    Health check
</div>

<h2>Setup</h2>
<p>Configure this URL as the <code>auth_redirect</code> of the application:</p>
<div class="endpoint"><code>https://your-host/auth</code></div>
<p>The nonce travels inside the encrypted payload; anything after <code>/auth/</code> is ignored.</p>"#;
    layout("Forum verification service", body)
}

pub fn render_not_found(path: &str) -> String {
    let body = format!(
        r#"<h1>404 - Page not found</h1>
<p>Path: {}</p>
<a href="/">Back to the index</a>"#,
        escape_html(path)
    );
    layout("404 Not Found", &body)
}
