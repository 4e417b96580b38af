// ABOUTME: Renders a batch run transcript (source plus program output) as an HTML page
// ABOUTME: The page is snapshotted like any other document to give batch tasks an artifact

use lazy_static::lazy_static;
use std::path::Path;
use syntect::easy::HighlightLines;
use syntect::highlighting::ThemeSet;
use syntect::html::{styled_line_to_highlighted_html, IncludeBackground};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

/// Output beyond this many characters is cut and marked as truncated.
pub const MAX_OUTPUT_CHARS: usize = 2000;

lazy_static! {
    static ref SYNTAXES: SyntaxSet = SyntaxSet::load_defaults_newlines();
    static ref THEMES: ThemeSet = ThemeSet::load_defaults();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Theme {
    /// Light editor with a shell window underneath, used for Python.
    Idle,
    /// Dark IDE with a console pane, used for C and C++.
    CodeBlocks,
    /// Plain editor, everything else.
    Notepad,
}

impl Theme {
    fn for_language(language: &str) -> Self {
        match language {
            "python" => Theme::Idle,
            "c" | "cpp" => Theme::CodeBlocks,
            _ => Theme::Notepad,
        }
    }

    /// Bundled color scheme used for the source pane.
    fn highlight_theme(self) -> &'static str {
        match self {
            Theme::Idle => "InspiredGitHub",
            Theme::CodeBlocks => "base16-eighties.dark",
            Theme::Notepad => "base16-ocean.light",
        }
    }

    fn css(self) -> &'static str {
        match self {
            Theme::Idle => {
                "body{background:#f0f0f0;color:#000}\
                 .pane{background:#fff;border:1px solid #a0a0a0}\
                 .bar{background:#dcdcdc;color:#000}\
                 .output .code{color:#1a1aa6}"
            }
            Theme::CodeBlocks => {
                "body{background:#2b2b2b;color:#dcdcdc}\
                 .pane{background:#1e1e1e;border:1px solid #3c3c3c}\
                 .bar{background:#3c3f41;color:#dcdcdc}\
                 .output{background:#000}.output .code{color:#c0c0c0}"
            }
            Theme::Notepad => {
                "body{background:#ffffff;color:#000}\
                 .pane{background:#fff;border:1px solid #ccc}\
                 .bar{background:#f3f3f3;color:#333}\
                 .output .code{color:#222}"
            }
        }
    }
}

/// A finished batch run, ready to be rendered.
#[derive(Debug, Clone)]
pub struct Transcript<'a> {
    pub language: &'a str,
    pub file_name: &'a str,
    pub source: &'a str,
    pub output: &'a str,
    pub exit_code: Option<i64>,
}

impl Transcript<'_> {
    pub fn render(&self) -> String {
        let theme = Theme::for_language(self.language);
        let status = match self.exit_code {
            Some(code) => format!("Process finished with exit code {}", code),
            None => "Process did not finish".to_string(),
        };

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>{file}</title>
<style>
body{{margin:0;padding:16px;font-family:Consolas,"DejaVu Sans Mono",monospace;font-size:14px}}
.pane{{margin-bottom:16px}}
.bar{{padding:4px 8px;font-family:Segoe UI,Arial,sans-serif;font-size:12px}}
.code{{margin:0;padding:8px;white-space:pre-wrap;word-break:break-word}}
{theme}
</style>
</head>
<body>
<div class="pane source"><div class="bar">{file}</div><pre class="code">{source}</pre></div>
<div class="pane output"><div class="bar">Output</div><pre class="code">{output}
{status}</pre></div>
</body>
</html>
"#,
            file = escape_html(self.file_name),
            theme = theme.css(),
            source = highlight_source(self.source, self.file_name, theme),
            output = escape_html(&clean_output(self.output)),
            status = escape_html(&status),
        )
    }
}

/// Color the source by the syntax its file extension names. Unknown
/// extensions and highlighter failures fall back to escaped plain text.
fn highlight_source(source: &str, file_name: &str, theme: Theme) -> String {
    highlight(source, file_name, theme).unwrap_or_else(|| escape_html(source))
}

fn highlight(source: &str, file_name: &str, theme: Theme) -> Option<String> {
    let extension = Path::new(file_name).extension()?.to_str()?;
    let syntax = SYNTAXES.find_syntax_by_extension(extension)?;
    let scheme = THEMES.themes.get(theme.highlight_theme())?;

    let mut highlighter = HighlightLines::new(syntax, scheme);
    let mut html = String::with_capacity(source.len() * 2);
    for line in LinesWithEndings::from(source) {
        let regions = highlighter.highlight_line(line, &SYNTAXES).ok()?;
        html.push_str(&styled_line_to_highlighted_html(&regions, IncludeBackground::No).ok()?);
    }
    Some(html)
}

/// Normalize line endings, drop trailing blank lines and cap the length.
pub fn clean_output(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = normalized.trim_end();

    if trimmed.chars().count() <= MAX_OUTPUT_CHARS {
        return trimmed.to_string();
    }

    let mut cut: String = trimmed.chars().take(MAX_OUTPUT_CHARS).collect();
    cut.push_str("\n... (output truncated)");
    cut
}

pub fn escape_html(raw: &str) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<script>alert('x') & \"y\"</script>"),
            "&lt;script&gt;alert(&#39;x&#39;) &amp; &quot;y&quot;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_clean_output_truncates() {
        let long = "a".repeat(MAX_OUTPUT_CHARS + 50);
        let cleaned = clean_output(&long);
        let (kept, marker) = cleaned.split_once("\n... (output truncated)").unwrap();
        assert!(marker.is_empty());
        assert_eq!(kept.chars().count(), MAX_OUTPUT_CHARS);
        assert!(kept.chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_clean_output_normalizes_line_endings() {
        assert_eq!(clean_output("one\r\ntwo\r\n\n\n"), "one\ntwo");
    }

    #[test]
    fn test_render_contains_escaped_source_and_output() {
        let page = Transcript {
            language: "python",
            file_name: "main.py",
            source: "print('<b>hi</b>')",
            output: "<b>hi</b>\n",
            exit_code: Some(0),
        }
        .render();

        assert!(!page.contains("<b>hi"));
        assert!(page.contains("&lt;b&gt;hi&lt;/b&gt;"));
        assert!(page.contains("Process finished with exit code 0"));
        assert!(page.contains("#f0f0f0"));
    }

    #[test]
    fn test_source_is_highlighted_by_extension() {
        let page = Transcript {
            language: "python",
            file_name: "main.py",
            source: "def greet():\n    return \"<b>\"\n",
            output: "",
            exit_code: Some(0),
        }
        .render();

        assert!(page.contains("<span style=\"color:"), "{}", page);
        assert!(page.contains("greet"));
        assert!(!page.contains("\"<b>\""));
        assert!(page.contains("&lt;b&gt;"));
    }

    #[test]
    fn test_unknown_extension_falls_back_to_plain_text() {
        let source = "if x < 1 { y }";
        assert_eq!(
            highlight_source(source, "notes.zzunknown", Theme::Notepad),
            escape_html(source)
        );
        assert_eq!(
            highlight_source(source, "Makefile-less", Theme::Notepad),
            escape_html(source)
        );
    }

    #[test]
    fn test_every_theme_has_a_bundled_scheme() {
        for theme in [Theme::Idle, Theme::CodeBlocks, Theme::Notepad] {
            assert!(THEMES.themes.contains_key(theme.highlight_theme()));
        }
    }

    #[test]
    fn test_theme_selection() {
        assert_eq!(Theme::for_language("cpp"), Theme::CodeBlocks);
        assert_eq!(Theme::for_language("shell"), Theme::Notepad);
    }
}
