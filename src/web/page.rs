//! Landing page rendering

use std::fmt::Write;

/// What the landing page shows besides the forms
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LandingPage {
    /// URL of the uploaded image
    pub original_image: Option<String>,
    /// URL of the processed image
    pub output_image: Option<String>,
    pub error: Option<String>,
}

impl LandingPage {
    #[must_use]
    pub fn with_original(url: String) -> Self {
        Self {
            original_image: Some(url),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_output(url: String) -> Self {
        Self {
            output_image: Some(url),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_error<S: Into<String>>(message: S) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut body = String::new();

        if let Some(error) = &self.error {
            let _ = write!(body, r#"<p class="error">{}</p>"#, escape_html(error));
        }
        if let Some(url) = &self.original_image {
            let url = escape_html(url);
            let _ = write!(
                body,
                r#"<section><h2>Original</h2><img src="{url}" alt="Uploaded image"></section>"#
            );
        }
        if let Some(url) = &self.output_image {
            let url = escape_html(url);
            let _ = write!(
                body,
                r#"<section><h2>Background removed</h2><img src="{url}" alt="Processed image"><p><a href="{url}" download>Download</a></p></section>"#
            );
        }

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Background Remover</title>
<style>
body {{ font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }}
img {{ max-width: 100%; background: repeating-conic-gradient(#ddd 0 25%, #fff 0 50%) 0 0 / 20px 20px; }}
.error {{ color: #b00020; }}
</style>
</head>
<body>
<h1>Background Remover</h1>
<form action="/upload" method="post" enctype="multipart/form-data">
<input type="file" name="file" accept="image/*">
<button type="submit">Upload</button>
</form>
<form action="/process" method="post">
<button type="submit">Remove background</button>
</form>
{body}
</body>
</html>
"#
        )
    }
}

/// URL of a file in the incoming slot
#[must_use]
pub fn upload_url(name: &str) -> String {
    format!("/uploads/{name}")
}

/// URL of a file in the processed slot
#[must_use]
pub fn output_url(name: &str) -> String {
    format!("/outputs/{name}")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_page_has_forms_only() {
        let html = LandingPage::default().render();
        assert!(html.contains(r#"action="/upload""#));
        assert!(html.contains(r#"name="file""#));
        assert!(html.contains(r#"action="/process""#));
        assert!(!html.contains("<img"));
        assert!(!html.contains(r#"class="error""#));
    }

    #[test]
    fn test_links_and_error_are_escaped() {
        let html = LandingPage::with_original(upload_url("a\"b<c>.png")).render();
        assert!(html.contains("/uploads/a&quot;b&lt;c&gt;.png"));

        let html = LandingPage::with_error("No file uploaded").render();
        assert!(html.contains("No file uploaded"));

        let html = LandingPage::with_output(output_url("processed_cat.png")).render();
        assert!(html.contains(r#"href="/outputs/processed_cat.png" download"#));
    }
}
