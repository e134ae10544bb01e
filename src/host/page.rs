//! Standalone HTML page around rendered messages

use crate::util::escape_html;
use chrono::Local;

const STYLESHEET: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 52rem; margin: 2rem auto; padding: 0 1rem; color: #1f2328; background: #fff; }
.tr-message { border-bottom: 1px solid #d0d7de; padding: 1rem 0; }
.tr-message__role { font-weight: 600; text-transform: capitalize; margin-bottom: .5rem; color: #57606a; }
.tr-message__content { white-space: pre-wrap; line-height: 1.5; }
.tr-block { border: 1px solid #d0d7de; border-left-width: 4px; border-radius: 6px; margin: .75rem 0; background: #f6f8fa; white-space: normal; }
.tr-block__header { display: flex; align-items: center; gap: .5rem; padding: .4rem .6rem; font-weight: 600; }
.tr-block__title { flex: 1; }
.tr-block__body { padding: .6rem .8rem; border-top: 1px solid #d0d7de; white-space: pre-wrap; font-family: ui-monospace, monospace; font-size: .9em; }
.tr-block button { border: 0; background: none; cursor: pointer; font-size: 1em; padding: 0 .2rem; }
.tr-block--thinking { border-left-color: #8250df; }
.tr-block--function { border-left-color: #0969da; }
.tr-block--error { border-left-color: #cf222e; background: #fff5f5; }
.tr-block--warning { border-left-color: #bf8700; }
.tr-block--search { border-left-color: #1a7f37; }
.tr-block--reflection, .tr-block--profile, .tr-block--reminder, .tr-block--artifact, .tr-block--custom { border-left-color: #57606a; }
footer { margin-top: 2rem; color: #8c959f; font-size: .8em; }
"#;

/// Toggle and copy behaviour for generated blocks
const SCRIPT: &str = r#"
document.addEventListener('click', function (event) {
  var button = event.target.closest('.tr-block button[data-action]');
  if (!button) return;
  var body = document.getElementById(button.dataset.target);
  if (!body) return;
  if (button.dataset.action === 'toggle') {
    var expanded = body.hasAttribute('hidden');
    if (expanded) { body.removeAttribute('hidden'); } else { body.setAttribute('hidden', ''); }
    button.textContent = expanded ? '▼' : '▶';
    button.setAttribute('aria-expanded', String(expanded));
  } else if (button.dataset.action === 'copy') {
    navigator.clipboard.writeText(body.textContent.trim()).then(function () {
      var original = button.textContent;
      button.textContent = '✓';
      setTimeout(function () { button.textContent = original; }, 2000);
    });
  }
});
"#;

/// Full HTML document with stylesheet, script and a generation footer
pub fn html_page(title: &str, body: &str) -> String {
    let generated = Local::now().format("%Y-%m-%d %H:%M:%S");
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>{style}</style>
</head>
<body>
<main>
{body}</main>
<footer>Rendered by tagrender {version} at {generated}</footer>
<script>{script}</script>
</body>
</html>
"#,
        title = escape_html(title),
        style = STYLESHEET,
        body = body,
        version = crate::config::VERSION,
        generated = generated,
        script = SCRIPT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_escapes_title() {
        let page = html_page("a <b> & c", "<p>x</p>");
        assert!(page.contains("<title>a &lt;b&gt; &amp; c</title>"));
        assert!(page.contains("<p>x</p>"));
        assert!(page.contains("Rendered by tagrender"));
    }
}
