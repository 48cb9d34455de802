//! Deterministic cleanup of per-page markdown.
//!
//! Both sources of page markdown need it: pdfium's text layer comes with
//! CRLF line breaks, stray soft hyphens and trailing blanks, and LLM output
//! sometimes arrives wrapped in a ```` ```markdown ```` fence or with image
//! links to files that do not exist. Rules are plain `&str → String`
//! functions applied in a fixed order by [`clean_markdown`].

use once_cell::sync::Lazy;
use regex::Regex;

/// Which optional rules to apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    /// Replace every image link with its alt text (image extraction disabled).
    pub drop_images: bool,
}

/// Apply the cleanup rules in order.
///
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip a fence wrapping the whole page
/// 3. Remove invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Rewrite image links (placeholder targets always; all when `drop_images`)
/// 5. Trim trailing whitespace per line
/// 6. Collapse runs of blank lines to one blank line
/// 7. End with exactly one newline
pub fn clean_markdown(input: &str, options: CleanOptions) -> String {
    let s = normalise_line_endings(input);
    let s = strip_outer_fence(&s);
    let s = remove_invisible_chars(&s);
    let s = rewrite_images(&s, options.drop_images);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*?)\n```[ \t]*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'],
        "",
    )
}

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

/// Image targets that cannot refer to anything the caller will receive.
fn is_placeholder_target(url: &str) -> bool {
    let u = url.trim();
    !(u.starts_with("http://") || u.starts_with("https://"))
        || ["example.com", "placeholder.com", "placehold.it", "dummyimage.com"]
            .iter()
            .any(|d| u.contains(d))
}

fn rewrite_images(input: &str, drop_all: bool) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            if !drop_all && !is_placeholder_target(&caps[2]) {
                return caps[0].to_string();
            }
            let alt = caps[1].trim();
            if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fence_and_crlf() {
        let out = clean_markdown("```markdown\r\n# Title\r\nBody\r\n```", CleanOptions::default());
        assert_eq!(out, "# Title\nBody\n");
    }

    #[test]
    fn inner_code_fences_survive() {
        let input = "Intro\n\n```rust\nfn main() {}\n```\n";
        assert_eq!(clean_markdown(input, CleanOptions::default()), input);
    }

    #[test]
    fn collapses_blank_runs_and_trailing_spaces() {
        let out = clean_markdown("a   \n\n\n\n\nb\t\n", CleanOptions::default());
        assert_eq!(out, "a\n\nb\n");
    }

    #[test]
    fn removes_invisible_characters() {
        let out = clean_markdown("co\u{00AD}operate\u{200B} now\u{FEFF}", CleanOptions::default());
        assert_eq!(out, "cooperate now\n");
    }

    #[test]
    fn placeholder_images_become_captions() {
        let out = clean_markdown(
            "![Revenue chart](chart.png)\n![Real](https://cdn.host.org/f.png)",
            CleanOptions::default(),
        );
        assert!(out.contains("*Revenue chart*"));
        assert!(out.contains("![Real](https://cdn.host.org/f.png)"));
    }

    #[test]
    fn drop_images_rewrites_every_link() {
        let out = clean_markdown(
            "![Real](https://cdn.host.org/f.png)\n![](x.png)",
            CleanOptions { drop_images: true },
        );
        assert_eq!(out, "*Real*\n");
    }

    #[test]
    fn whitespace_only_input_cleans_to_empty() {
        assert_eq!(clean_markdown(" \r\n\u{200B}\n\t", CleanOptions::default()), "");
    }
}
