//! Prompts for the structuring phase.
//!
//! Callers can override the system prompt via
//! [`crate::config::StructuringOptions::system_prompt`]; the constant here is
//! used only when no override is provided.

use crate::pipeline::DocumentKind;

/// Default system prompt for turning extracted text into Markdown.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a meticulous document structuring assistant. Rewrite the text you are given as clean, well-structured Markdown.

Follow these rules precisely:

1. FIDELITY
   - Keep ALL information from the source; never invent content
   - Keep the original language and reading order

2. STRUCTURE
   - Recognise headings and use #, ##, ### by level
   - Use - for unordered lists and 1. 2. 3. for ordered lists
   - Rebuild tables in GFM pipe format

3. CLEAN-UP
   - Remove obvious noise only, such as repeated page headers, footers and page numbers
   - Keep formulas, code and tables readable; wrap code in fenced blocks

4. OUTPUT FORMAT
   - Output ONLY the Markdown content
   - Do NOT wrap the answer in ```markdown fences
   - Do NOT add commentary or explanations"#;

/// User message wrapping the extracted text between explicit markers.
pub fn structuring_user_prompt(text: &str, kind: DocumentKind) -> String {
    let source = match kind {
        DocumentKind::Pdf => "OCR output of a scanned PDF",
        DocumentKind::DualLayerPdf => "text layer of a PDF",
        DocumentKind::Doc | DocumentKind::Docx => "text of a Word document",
    };
    format!(
        "Restructure the following {source} as Markdown.\n\n--- SOURCE START ---\n{text}\n--- SOURCE END ---"
    )
}
