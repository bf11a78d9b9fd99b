//! Standalone HTML page for sharing an uploaded file.

/// Render the preview page for a stored file reachable at `url`.
pub fn render(name: &str, url: &str, content_type: &str) -> String {
    let name = escape_html(name);
    let url = escape_html(url);

    let media = if content_type.starts_with("image/") {
        format!(r#"<img src="{url}" alt="{name}">"#)
    } else {
        format!(r#"<a class="download" href="{url}">Download {name}</a>"#)
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{name}</title>
<style>
  body {{ font-family: system-ui, sans-serif; background: #111; color: #eee; margin: 0; padding: 2rem; text-align: center; }}
  img {{ max-width: 100%; max-height: 75vh; border-radius: 6px; }}
  a {{ color: #8cf; }}
  .share {{ display: flex; gap: .5rem; justify-content: center; margin-top: 1.5rem; }}
  .share input {{ width: min(40rem, 70vw); padding: .5rem; background: #222; color: #eee; border: 1px solid #444; border-radius: 4px; }}
  .share button {{ padding: .5rem 1rem; cursor: pointer; }}
</style>
</head>
<body>
{media}
<div class="share">
  <input id="url" type="text" value="{url}" readonly>
  <button type="button" onclick="copyUrl(this)">Copy URL</button>
</div>
<script>
  function copyUrl(button) {{
    const input = document.getElementById("url");
    input.select();
    navigator.clipboard.writeText(input.value).then(() => {{
      button.textContent = "Copied!";
      setTimeout(() => {{ button.textContent = "Copy URL"; }}, 1500);
    }});
  }}
</script>
</body>
</html>
"#
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
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
