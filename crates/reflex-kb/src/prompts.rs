use tracing::warn;

pub const DEFAULT_PROMPT: &str = "default";
pub const EMPTY_PROMPT: &str = "empty";

const DEFAULT_TEMPLATE: &str = "<instruction>Answer the question concisely and professionally using the known information. If the answer cannot be derived from it, say \"The question cannot be answered from the known information\". Do not add made-up content.</instruction>
<known_information>{{context}}</known_information>
<question>{{question}}</question>
";

const TEXT_TEMPLATE: &str = "<instruction>Answer the question concisely and professionally using the known information. If the answer cannot be derived from it, say \"The question cannot be answered from the known information\".</instruction>
<known_information>{{context}}</known_information>
<question>{{question}}</question>
";

const EMPTY_TEMPLATE: &str = "Please answer my question:
{{question}}

";

/// Knowledge-base chat template by name. Unknown names fall back to the
/// default template.
pub fn template(name: &str) -> &'static str {
    match name {
        DEFAULT_PROMPT => DEFAULT_TEMPLATE,
        "text" => TEXT_TEMPLATE,
        EMPTY_PROMPT => EMPTY_TEMPLATE,
        other => {
            warn!(target: "reflex::kb", prompt_name = other, "unknown prompt template, using default");
            DEFAULT_TEMPLATE
        }
    }
}

/// Fill `{{context}}` and `{{question}}` in one pass over the template, so
/// placeholder text inside the substituted values stays literal.
pub fn render(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{{context}}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{{question}}") {
            out.push_str(question);
            rest = after;
        } else {
            out.push_str("{{");
            rest = &tail[2..];
        }
    }
    out.push_str(rest);
    out
}
