use super::OracleRequest;

pub const REWRITE_SYSTEM: &str = r#"You rewrite text inside source files. You receive a search term, a replacement term, an instruction, and a list of nodes. Each node is a piece of text found in a file, with its surrounding snippet and, for text split across several elements, the ordered fragments.

OUTPUT FORMAT (JSON):
{
  "modifications": [
    {
      "nodeIndex": 0,
      "originalSnippet": "exact snippet text you are replacing (optional)",
      "modifiedSnippet": "the snippet after your change (optional)",
      "originalContent": "the node content",
      "modifiedContent": "the node content after your change",
      "reasoning": "one short sentence",
      "confidence": 0.0,
      "shouldApply": true,
      "strategy": "snippet_replace | content_replace | fragment_redistribute | skip",
      "warnings": []
    }
  ],
  "overallStrategy": "one short phrase",
  "batchConfidence": 0.0
}

RULES:
- Return exactly one modification per node, using the node's index
- originalSnippet must be copied verbatim from the node's snippet
- For fragmented nodes, modifiedContent must read as the full replacement text; it is split across the fragments by word count
- Keep markup, attributes, quoting and indentation unchanged
- Set shouldApply to false when the node is not actually about the search term"#;

/// User message for one batch
pub fn rewrite_user(request: &OracleRequest) -> anyhow::Result<String> {
    let payload = serde_json::to_string_pretty(request)?;
    Ok(format!(
        "INSTRUCTION: {}\nCHANGE: \"{}\" -> \"{}\"\n\nBATCH:\n{}",
        request.user_instruction, request.search_term, request.replacement_term, payload
    ))
}
