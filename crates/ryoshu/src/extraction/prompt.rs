//! Prompt template for receipt field extraction.

/// Builds the single user message sent to the model.
///
/// The uploader name is embedded as a JSON string literal so quotes or
/// newlines in it cannot break the template.
pub fn build_prompt(uploader_name: &str, ocr_text: &str) -> String {
    let uploader = serde_json::to_string(uploader_name).unwrap_or_else(|_| "\"\"".to_string());

    format!(
        r#"Prefer Japanese over English. Only use English where the receipt itself is in English; do not translate to English.
Analyze this receipt and respond with ONLY a JSON object in exactly this format, with no surrounding text or code fences:
{{
  "uploader_name": {uploader},
  "receipt_type": "the best category for this receipt, e.g. 'grocery', 'internet telephone payment', 'parking'; give the Japanese term as well",
  "date": "date of purchase as printed",
  "company_name": "the company or store name on the receipt",
  "price": "the full amount paid in Japanese yen, digits only, no unit",
  "file_name": "a short descriptive image filename such as 2024-01-31_company.jpg",
  "items": [
    {{"name": "item name", "quantity": "quantity", "unit_price": "unit price, digits only", "total_price": "line total, digits only"}}
  ]
}}
OCRテキスト:
{ocr_text}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_inputs() {
        let prompt = build_prompt("u1", "コンビニ 500円");
        assert!(prompt.contains("\"uploader_name\": \"u1\""));
        assert!(prompt.ends_with("コンビニ 500円\n"));
        assert!(prompt.contains("ONLY a JSON object"));
    }

    #[test]
    fn test_prompt_escapes_uploader() {
        let prompt = build_prompt("a\"b", "text");
        assert!(prompt.contains(r#""uploader_name": "a\"b""#));
    }

    #[test]
    fn test_prompt_lists_every_required_key() {
        let prompt = build_prompt("u1", "");
        for key in super::super::fields::REQUIRED_FIELDS {
            assert!(prompt.contains(&format!("\"{}\"", key)), "missing {}", key);
        }
        assert!(prompt.contains("\"items\""));
    }
}
