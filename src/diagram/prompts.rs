//! Prompt templates for the diagram chain.

/// System prompt for the architecture explanation stage.
pub const EXPLANATION_SYSTEM: &str = "You are a senior software architect. \
Given a repository file tree and README, describe the system's architecture: \
its purpose, the major components, how data flows between them, and any \
external services or storage it depends on. Be concrete and specific; name \
the directories and files that back each component. Do not produce a diagram \
yet. Keep the description under 900 words.";

/// System prompt for the component-to-path mapping stage.
pub const MAPPING_SYSTEM: &str = "You bind architecture components to paths \
in a repository. Given an architecture description and the file tree, reply \
with a JSON array only, no prose and no code fences. Each element has the \
shape {\"component\": string, \"paths\": [string], \"role\": string}. Every \
path must appear verbatim in the file tree; never invent paths. Skip \
components you cannot place.";

/// System prompt for the graph synthesis stage.
pub const SYNTHESIS_SYSTEM: &str = "You emit flowchart diagram text. Output \
only the diagram, no prose, no code fences, no init blocks, no style or \
click lines. Grammar: a `flowchart TD` header; node declarations like \
id[\"Label\"] with ids of letters, digits and underscores; storage nodes as \
id[(\"Label\")]; edges as a --> b or a -->|\"label\"| b; optional \
subgraph \"Title\" ... end groups (not nested); style via :::internal, \
:::external, :::storage or :::entry class suffixes. Represent every \
component from the description, group related ones in subgraphs, and label \
the data-flow edges. Prefer a vertical layout.";

/// Build the user prompt for the explanation stage.
pub fn explanation_prompt(tree_text: &str, readme: &str) -> String {
    let mut prompt = format!("<file_tree>\n{tree_text}\n</file_tree>\n");
    if !readme.is_empty() {
        prompt.push_str(&format!("<readme>\n{readme}\n</readme>\n"));
    }
    prompt
}

/// Build the user prompt for the mapping stage.
pub fn mapping_prompt(explanation: &str, tree_text: &str) -> String {
    format!(
        "<explanation>\n{explanation}\n</explanation>\n\n<file_tree>\n{tree_text}\n</file_tree>"
    )
}

/// Build the repair prompt after hallucinated paths were rejected.
pub fn mapping_repair_prompt(explanation: &str, tree_text: &str, rejected: &[String]) -> String {
    format!(
        "Your previous mapping referenced paths that do not exist in the \
         repository: {}. Produce the JSON array again using only paths that \
         appear in the file tree.\n\n<explanation>\n{explanation}\n</explanation>\n\n\
         <file_tree>\n{tree_text}\n</file_tree>",
        rejected.join(", ")
    )
}

/// Build the user prompt for the synthesis stage.
pub fn synthesis_prompt(explanation: &str, mapping_json: &str) -> String {
    format!(
        "<explanation>\n{explanation}\n</explanation>\n\n<component_mapping>\n{mapping_json}\n</component_mapping>"
    )
}

/// Build the repair prompt after a diagram parse failure.
pub fn synthesis_repair_prompt(previous: &str, parse_error: &str) -> String {
    format!(
        "The diagram you produced failed to parse: {parse_error}. Emit the \
         corrected diagram text only.\n\n<previous_diagram>\n{previous}\n</previous_diagram>"
    )
}
