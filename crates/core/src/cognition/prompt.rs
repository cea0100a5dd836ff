//! Prompt framing for cognitive steps and cleanup of backend replies.

/// Text appended to a step's instructions asking for `{name} {verb}: "..."`.
pub fn reply_format(name: &str, verb: &str) -> String {
    format!("Use the format: '{name} {verb}: \"...\"'")
}

pub fn external_dialog(name: &str, instructions: &str) -> String {
    format!(
        "Model the mind of {name}.\n\n\
         ## Instructions\n\
         * DO NOT include actions (for example, do NOT add non-verbal items like *John Smiles* or *John Nods*, etc).\n\
         * Only say what {name} would say out loud.\n\
         * {instructions}\n\n\
         Please reply with the next utterance from {name}. {}",
        reply_format(name, "said")
    )
}

pub fn internal_monologue(name: &str, verb: &str, instructions: &str) -> String {
    format!(
        "Model the mind of {name}.\n\n\
         ## Description\n\
         {instructions}\n\n\
         ## Rules\n\
         * Internal monologue thoughts should match the speaking style of {name}.\n\
         * Only respond with the format '{name} {verb}: \"...\"', no additional commentary or text.\n\
         * Follow the Description when creating the internal thought!\n\n\
         Please reply with the next internal monologue thought of {name}. {}",
        reply_format(name, verb)
    )
}

pub fn brainstorm(name: &str, instructions: &str) -> String {
    format!(
        "Model the mind of {name}.\n\n\
         ## Description\n\
         {instructions}\n\n\
         Reply with a single short observation from {name}, no lists and no commentary. {}",
        reply_format(name, "noticed")
    )
}

pub fn decision(name: &str, description: &str, choices: &[String]) -> String {
    let options: Vec<String> = choices.iter().map(|c| format!("* {c}")).collect();
    format!(
        "{name} is deciding between the following options:\n\
         {}\n\n\
         ## Description\n\
         {description}\n\n\
         ## Rules\n\
         * {name} must decide on exactly one of the options.\n\
         * Reply with the chosen option copied verbatim and nothing else.\n\n\
         Please reply with {name}'s decision.",
        options.join("\n")
    )
}

pub fn series_notes(name: &str, existing: &str) -> String {
    format!(
        "## Existing notes\n\
         {existing}\n\n\
         ## Description\n\
         Write an updated and clear paragraph describing everything that happened so far.\n\
         Make sure to keep details that {name} would want to remember.\n\n\
         ## Rules\n\
         * Keep descriptions as a paragraph\n\
         * Keep relevant information from before\n\
         * Use abbreviated language to keep the notes short\n\
         * Make sure to detail the motivation of {name} (what are they trying to accomplish, what have they done so far).\n\n\
         Please reply with the updated notes on the series of events:"
    )
}

/// Remove a leading `{name} {verb}:` and surrounding quotes from a reply.
///
/// Replies that ignore the requested format are returned trimmed, unchanged.
pub fn strip_entity_and_verb(name: &str, verb: &str, response: &str) -> String {
    let trimmed = response.trim();
    let prefix = format!("{name} {verb}:");
    let body = match trimmed.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(&prefix) => trimmed[prefix.len()..].trim_start(),
        _ => trimmed,
    };
    strip_quotes(body).to_owned()
}

/// Strip one pair of matching surrounding quotes.
pub fn strip_quotes(text: &str) -> &str {
    let text = text.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if let Some(inner) = text.strip_prefix(open).and_then(|t| t.strip_suffix(close)) {
            return inner.trim();
        }
    }
    text
}

/// Normalize a decision reply for membership testing: drops an optional
/// `{name} decided:` prefix, quotes, and one trailing period.
pub fn normalize_choice(name: &str, response: &str) -> String {
    let stripped = strip_entity_and_verb(name, "decided", response);
    let stripped = stripped.strip_suffix('.').unwrap_or(&stripped);
    strip_quotes(stripped).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_name_verb_and_quotes() {
        assert_eq!(strip_entity_and_verb("Milton", "said", "Milton said: \"Oh. A chair.\""), "Oh. A chair.");
        assert_eq!(strip_entity_and_verb("Milton", "said", "  milton said:   'hm'  "), "hm");
        assert_eq!(strip_entity_and_verb("Milton", "thought", "no format here"), "no format here");
        assert_eq!(strip_entity_and_verb("Milton", "said", "“curly”"), "curly");
    }

    #[test]
    fn prefix_for_other_verb_is_kept() {
        assert_eq!(
            strip_entity_and_verb("Milton", "said", "Milton thought: \"x\""),
            "Milton thought: \"x\""
        );
    }

    #[test]
    fn normalize_choice_forms() {
        assert_eq!(normalize_choice("Milton", "3"), "3");
        assert_eq!(normalize_choice("Milton", " \"very long\". "), "very long");
        assert_eq!(normalize_choice("Milton", "Milton decided: yes"), "yes");
        assert_eq!(normalize_choice("Milton", "seven"), "seven");
    }

    #[test]
    fn decision_prompt_lists_choices_in_order() {
        let choices: Vec<String> = ["5", "4", "0"].iter().map(|s| s.to_string()).collect();
        let p = decision("Milton", "How many?", &choices);
        let five = p.find("* 5").unwrap();
        let zero = p.find("* 0").unwrap();
        assert!(five < zero);
        assert!(p.contains("How many?"));
    }

    #[test]
    fn external_dialog_keeps_literal_instruction() {
        let p = external_dialog("Milton", "WITHOUT USING ELLIPSES.");
        assert!(p.contains("WITHOUT USING ELLIPSES."));
        assert!(p.contains("Milton said: \"...\""));
    }
}
