//! Minimal XML helpers for the device control API.
//!
//! Device responses are small flat documents; values are pulled out by tag
//! name rather than through a full document model.

/// Extract the text content of the first `<tag>` element, namespace prefix allowed.
pub fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let mut search_from = 0;

    while let Some(offset) = xml[search_from..].find('<') {
        let open = search_from + offset;
        let rest = &xml[open + 1..];
        let name_end = rest.find(|c: char| c == '>' || c == '/' || c.is_whitespace())?;
        let name = &rest[..name_end];
        let local = name.rsplit(':').next().unwrap_or(name);

        if local == tag {
            let tag_close = rest.find('>')?;
            if rest[..tag_close].ends_with('/') {
                return Some(String::new());
            }
            let content = &rest[tag_close + 1..];
            let end = content.find(&format!("</{name}>"))?;
            return Some(unescape_xml_text(content[..end].trim()));
        }

        search_from = open + 1;
    }

    None
}

/// Escape text for use inside an XML element.
pub fn escape_xml_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_xml_text(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
