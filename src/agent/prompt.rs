//! System prompt built from the tool catalog

use crate::tools::Catalog;

const PROMPT_INTRO: &str = "You are an autonomous agent that completes tasks by calling tools.";

const PROMPT_GUIDELINES: &str = r#"Guidelines:
- Use tools to verify facts and inspect state rather than guessing
- Several independent tool calls may be issued in one response
- If a tool returns an error, read it and adjust your next call
- Files live under /workspace in the session environment
- When the task is complete, respond with your final answer in plain text"#;

/// Build the default system prompt, grouping tools by their source
///
/// Sources appear in registration order (local tools first).
pub fn build_system_prompt(catalog: &Catalog) -> String {
    let mut groups: Vec<(&str, Vec<String>)> = Vec::new();

    for descriptor in catalog.descriptors() {
        let line = if descriptor.description.is_empty() {
            format!("- {}", descriptor.name)
        } else {
            format!("- {}: {}", descriptor.name, first_line(&descriptor.description))
        };

        match groups.iter_mut().find(|(source, _)| *source == descriptor.source()) {
            Some((_, lines)) => lines.push(line),
            None => groups.push((descriptor.source(), vec![line])),
        }
    }

    let mut prompt = String::from(PROMPT_INTRO);
    prompt.push_str("\n\n## Available Tools\n");

    if groups.is_empty() {
        prompt.push_str("\nNo tools are available. Answer from your own knowledge.\n");
    }

    for (source, lines) in groups {
        let heading = if source == "local" {
            "Environment tools".to_string()
        } else {
            format!("Provider `{}`", source)
        };
        prompt.push_str(&format!("\n### {}\n", heading));
        for line in lines {
            prompt.push_str(&line);
            prompt.push('\n');
        }
    }

    prompt.push('\n');
    prompt.push_str(PROMPT_GUIDELINES);
    prompt
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolDescriptor, ToolTarget};
    use serde_json::json;

    #[test]
    fn test_tools_grouped_by_source() {
        let remote = |name: &str| ToolDescriptor {
            name: name.to_string(),
            source_provider_id: Some("shop".to_string()),
            description: format!("{} things\nsecond line", name),
            input_schema: json!({}),
        };
        let catalog = Catalog::from_sources(
            vec![
                (ToolTarget::Local, vec![ToolDescriptor::local("bash", "Run commands", json!({}))]),
                (ToolTarget::Local, vec![remote("search"), remote("order")]),
            ],
            None,
        );

        let prompt = build_system_prompt(&catalog);
        let env = prompt.find("### Environment tools").unwrap();
        let shop = prompt.find("### Provider `shop`").unwrap();
        assert!(env < shop);
        assert!(prompt.contains("- bash: Run commands"));
        assert!(prompt.contains("- search: search things\n"));
        assert!(!prompt.contains("second line"));
    }

    #[test]
    fn test_empty_catalog_prompt() {
        let prompt = build_system_prompt(&Catalog::default());
        assert!(prompt.contains("No tools are available"));
    }
}
