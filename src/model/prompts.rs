//! Prompt templates.
//!
//! Templates use `{name}` placeholders filled by [`render`]. Unknown
//! placeholders are left as they are.

/// System prompt for turning sampled frames into steps
pub const SYNTHESIS_SYSTEM: &str = "\
You watch screen recordings of a person using a desktop computer and write \
down what they did as instructions someone else can follow. Each instruction \
must be self-contained: name the application, the control and the value \
involved. Never refer to frame numbers.";

/// User prompt placed after the frames
pub const SYNTHESIS_TEMPLATE: &str = "\
The {frame_count} images above are frames from one recording, in chronological \
order.
{context}
Describe the workflow as a numbered list, one action per line:
1. <first instruction>
2. <second instruction>
If it helps, add an indented line `Expected: <what the screen shows afterwards>` \
under an instruction. Output only the list.";

/// System prompt for choosing the next action
pub const PLANNER_SYSTEM: &str = "\
You operate a {arch} computer through a single tool. The current date is {date}.
Answer with exactly one JSON object and nothing else. Allowed forms:
{\"action\": \"key\", \"text\": \"ctrl+s\"}
{\"action\": \"type\", \"text\": \"hello\"}
{\"action\": \"mouse_move\", \"coordinate\": [x, y]}
{\"action\": \"left_click_drag\", \"coordinate\": [x, y]}
{\"action\": \"left_click\"}
{\"action\": \"right_click\"}
{\"action\": \"middle_click\"}
{\"action\": \"double_click\"}
{\"action\": \"screenshot\"}
{\"action\": \"cursor_position\"}
Clicks happen at the current pointer position, so move the pointer first. \
Coordinates are pixels in the screenshot, origin at the top-left corner.";

/// User prompt for one planning call
pub const PLANNER_TEMPLATE: &str = "\
{instruction}
Current step ({step_index} of {step_count}): {step}
{hints}
Actions taken so far:
{history}

The attached screenshot is {width}x{height} pixels and shows the screen now. \
Choose the single next action that makes progress on the current step.";

/// Yes/no question asked after an action
pub const VERIFY_TEMPLATE: &str = "\
The attached screenshot was taken after working on this step:
{step}
{expected}
Has the step been completed? Answer \"yes\" or \"no\" first, then one sentence \
of explanation.";

/// Fill `{name}` placeholders
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in values {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

/// Prompt asking for the step list
pub fn synthesis_prompt(frame_count: usize, context: Option<&str>) -> String {
    let context = context
        .filter(|c| !c.trim().is_empty())
        .map(|c| format!("Context from the user: {}\n", c.trim()))
        .unwrap_or_default();
    render(
        SYNTHESIS_TEMPLATE,
        &[
            ("frame_count", frame_count.to_string().as_str()),
            ("context", context.as_str()),
        ],
    )
}

/// System prompt for the planner
pub fn planner_system(arch: &str, date: &str) -> String {
    render(PLANNER_SYSTEM, &[("arch", arch), ("date", date)])
}

/// Prompt for the verification question
pub fn verification_prompt(step: &str, expected_outcome: Option<&str>) -> String {
    let expected = expected_outcome
        .map(|e| format!("Expected result: {}", e))
        .unwrap_or_default();
    render(VERIFY_TEMPLATE, &[("step", step), ("expected", expected.as_str())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_placeholders() {
        assert_eq!(
            render("Step {n}: {what} {unknown}", &[("n", "2"), ("what", "save")]),
            "Step 2: save {unknown}"
        );
    }

    #[test]
    fn test_synthesis_prompt_asks_for_numbered_list() {
        let prompt = synthesis_prompt(5, Some("  invoice export  "));
        assert!(prompt.contains("5 images"));
        assert!(prompt.contains("Context from the user: invoice export"));
        assert!(prompt.contains("numbered list"));

        assert!(!synthesis_prompt(3, Some(" ")).contains("Context"));
    }

    #[test]
    fn test_planner_system_keeps_json_examples() {
        let prompt = planner_system("x86_64", "2026-10-16");
        assert!(prompt.contains("x86_64 computer"));
        assert!(prompt.contains("2026-10-16"));
        assert!(prompt.contains(r#"{"action": "key", "text": "ctrl+s"}"#));
    }

    #[test]
    fn test_verification_prompt() {
        let prompt = verification_prompt("Open the editor", Some("An empty document"));
        assert!(prompt.contains("Open the editor"));
        assert!(prompt.contains("Expected result: An empty document"));
    }
}
