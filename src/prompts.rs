//! Prompts for the LLM-assisted refinement pass of the pdfium backend.
//!
//! The provider sees two things per page: the rendered page image and the
//! raw text layer pdfium extracted from it. The text layer gives it exact
//! characters; the image gives it layout, reading order and tables. The
//! prompt asks for the union: the text layer's characters in the image's
//! structure.

/// System prompt for refining one page into markdown.
pub const REFINE_SYSTEM_PROMPT: &str = r#"You are an expert document converter. You receive one page of a document as an image, together with the raw text layer extracted from that page. Produce clean, well-structured Markdown for the page.

Follow these rules precisely:

1. TEXT
   - Preserve ALL text content; prefer the exact characters of the text layer
   - Fix reading order, hyphenation and broken lines using the image
   - If the text layer is empty or garbled, transcribe from the image

2. STRUCTURE
   - Use #, ##, ### for headings matching the visual hierarchy
   - Use - for unordered lists and 1. 2. 3. for ordered lists
   - Convert tables to GFM pipe tables; use HTML only when a pipe table cannot represent them
   - Render mathematics with LaTeX: $inline$ and $$display$$

3. IGNORE
   - Page numbers, running headers and footers, decorative rules

4. OUTPUT
   - Output ONLY the Markdown content, without ```markdown fences or commentary"#;

/// Appended to the system prompt when image extraction is disabled.
pub const DESCRIBE_IMAGES_RULE: &str = r#"

5. FIGURES
   - Do not emit image links. Describe each figure, chart or photo in one italic sentence where it appears."#;

/// Full system prompt, with the figure rule when images are not extracted.
pub fn system_prompt(describe_images: bool) -> String {
    let mut prompt = REFINE_SYSTEM_PROMPT.to_string();
    if describe_images {
        prompt.push_str(DESCRIBE_IMAGES_RULE);
    }
    prompt
}

/// User message text carrying the page's text layer.
pub fn page_message(page_num: usize, text_layer: &str) -> String {
    let text_layer = text_layer.trim();
    if text_layer.is_empty() {
        format!("Page {page_num}. The text layer is empty; transcribe the page from the image.")
    } else {
        format!("Page {page_num}. Text layer:\n\"\"\"\n{text_layer}\n\"\"\"")
    }
}
