//! Layered recovery of a JSON object from model output.

use serde_json::{Map, Value as Json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// The whole reply is a JSON object.
    Direct,
    /// The object sits inside a ```json fenced block.
    StripFences,
    /// The object is embedded in prose; take the outermost braces.
    BraceSubstring,
}

impl Extraction {
    pub const ORDER: [Extraction; 3] = [
        Extraction::Direct,
        Extraction::StripFences,
        Extraction::BraceSubstring,
    ];

    pub fn apply(&self, content: &str) -> Option<Map<String, Json>> {
        let candidate = match self {
            Extraction::Direct => content.trim(),
            Extraction::StripFences => strip_fences(content)?,
            Extraction::BraceSubstring => {
                let start = content.find('{')?;
                let end = content.rfind('}')?;
                if end <= start {
                    return None;
                }
                &content[start..=end]
            }
        };
        match serde_json::from_str(candidate) {
            Ok(Json::Object(map)) => Some(map),
            _ => None,
        }
    }
}

fn strip_fences(content: &str) -> Option<&str> {
    let start = content.find("```")?;
    let after = &content[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Try each strategy in order and return the first object found.
pub fn extract_json_object(content: &str) -> Option<Map<String, Json>> {
    Extraction::ORDER.iter().find_map(|strategy| {
        let found = strategy.apply(content);
        if found.is_some() {
            tracing::debug!("Extracted JSON object via {:?}", strategy);
        }
        found
    })
}
