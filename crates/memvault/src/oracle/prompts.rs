//! Prompts for the remote decision oracle
//!
//! Both prompts demand JSON so the port can schema-check the answer.

/// Split free text into atomic facts
///
/// Placeholder: {content} - the text to decompose
pub const EXTRACTION_PROMPT: &str = r#"Extract the key facts from the following text.

Each fact must be a short, self-contained statement that still makes sense on its own.
Keep the subject explicit (e.g. "User prefers green" rather than "prefers green").
If the text holds a single fact, return it unchanged as the only element.

Text:
{content}

Respond with a JSON array of strings and nothing else, for example:
["User's favorite color is blue", "User lives in Lisbon"]"#;

/// Triage new information against stored memories
///
/// Placeholders: {content} - the new information, {candidates} - JSON array of
/// existing memories with `id`, `content`, `importance`, `memory_type`, `distance`
pub const TRIAGE_PROMPT: &str = r#"You maintain an agent's long-term memory.

New information:
{content}

Existing memories that may be related (JSON):
{candidates}

Decide exactly one operation:
- "ADD": the information is new and does not overlap any existing memory.
- "UPDATE": the information revises or corrects one existing memory; set target_id to its id.
- "DELETE": the information makes one existing memory obsolete or false and adds nothing new; set target_id to its id.
- "NOOP": the information is already captured by an existing memory; set target_id to that memory if one applies.

Rate importance as an integer from 1 (trivial) to 10 (critical) for future interactions.

Respond with a single JSON object and nothing else:
{"op": "ADD", "importance": 5, "target_id": null, "rationale": "short reason"}"#;
