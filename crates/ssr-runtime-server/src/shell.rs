//! HTML document shell around rendered fragments.

use std::fmt::Write;

/// Client asset paths and script options for the shell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellAssets {
    /// Stylesheet URL.
    pub css_path: Option<String>,
    /// Client entry script URL.
    pub client_js_path: Option<String>,
    /// Load the client script as an ES module instead of `defer`.
    pub client_js_module: bool,
    /// HMR client module URL.
    pub hmr_client_path: Option<String>,
    /// Nonce put on every emitted `<script>`.
    pub nonce: Option<String>,
    /// Live-reload probe.
    pub reload_probe: Option<ReloadProbe>,
}

/// Live-reload polling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadProbe {
    /// URL polled for changes.
    pub path: String,
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
}

/// Wrap a fragment into a full document.
pub fn wrap(fragment: &str, props_json: &str, assets: &ShellAssets) -> String {
    let nonce = assets
        .nonce
        .as_deref()
        .map(|n| format!(" nonce=\"{}\"", escape_html(n)))
        .unwrap_or_default();

    let mut html = String::with_capacity(fragment.len() + props_json.len() + 1024);
    html.push_str(
        "<!doctype html>\n\
         <html lang=\"en\">\n  \
         <head>\n    \
         <meta charset=\"utf-8\" />\n    \
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n    \
         <title>ssr-runtime</title>\n",
    );

    if let Some(css) = &assets.css_path {
        let _ = writeln!(html, "    <link rel=\"stylesheet\" href=\"{}\" />", escape_html(css));
    }

    html.push_str("  </head>\n  <body>\n");
    let _ = writeln!(html, "    <div id=\"root\">{fragment}</div>");
    let _ = writeln!(
        html,
        "    <script id=\"__SSR_PROPS__\" type=\"application/json\"{nonce}>{}</script>",
        escape_for_script(props_json)
    );

    if let Some(hmr) = &assets.hmr_client_path {
        let _ = writeln!(
            html,
            "    <script type=\"module\" src=\"{}\"{nonce}></script>",
            escape_html(hmr)
        );
    }

    if let Some(client) = &assets.client_js_path {
        let loading = if assets.client_js_module { "type=\"module\"" } else { "defer" };
        let _ = writeln!(
            html,
            "    <script {loading} src=\"{}\"{nonce}></script>",
            escape_html(client)
        );
    }

    if let Some(probe) = &assets.reload_probe {
        let _ = writeln!(html, "    <script{nonce}>{}</script>", reload_script(probe));
    }

    html.push_str("  </body>\n</html>\n");
    html
}

/// Minimal error document. The message is HTML-escaped.
pub fn error_page(message: &str) -> String {
    format!(
        "<!doctype html>\n\
         <html lang=\"en\">\n  \
         <head><meta charset=\"utf-8\" /><title>ssr-runtime error</title></head>\n  \
         <body>\n    \
         <h1>Server render failed</h1>\n    \
         <pre>{}</pre>\n  \
         </body>\n\
         </html>\n",
        escape_html(message)
    )
}

/// Escape JSON for a `<script>` body: `<`, `>` and `&` become `\u` escapes.
pub fn escape_for_script(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '&' => escaped.push_str("\\u0026"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Escape text for HTML content and attribute values.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

// Reloads the page once the probe answers with a different body.
fn reload_script(probe: &ReloadProbe) -> String {
    let path = serde_json::to_string(&probe.path).unwrap_or_else(|_| "\"/\"".to_string());
    let path = escape_for_script(&path);
    format!(
        "(()=>{{let last=null;const tick=async()=>{{try{{\
         const res=await fetch({path},{{cache:\"no-store\"}});\
         const body=await res.text();\
         if(last!==null&&body!==last){{location.reload();return;}}\
         last=body;}}catch(_e){{}}\
         setTimeout(tick,{interval});}};\
         setTimeout(tick,{interval});}})();",
        interval = probe.interval_ms
    )
}
