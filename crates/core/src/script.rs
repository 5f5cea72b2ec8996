//! Comic script parsing.
//!
//! The text model is asked to answer in the form
//! `Panel N: <visual description> - <dialogue>`, but it does not always
//! comply. [`parse_comic_script`] therefore runs a strict header pass,
//! falls back to a line-oriented pass when the strict one comes up short,
//! and finally pads any missing slot with placeholder content. It never
//! fails: every strip has exactly [`PANEL_COUNT`] panels numbered
//! `1..=PANEL_COUNT`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of panels in every strip.
pub const PANEL_COUNT: u32 = 4;

/// Visual description used for a panel the script did not provide.
pub const PLACEHOLDER_VISUAL: &str = "Comic scene";

/// Dialogue used for a panel the script did not provide.
pub const PLACEHOLDER_DIALOGUE: &str = "Missing panel content";

/// Separator between the visual description and the dialogue.
const DIALOGUE_SEPARATOR: char = '-';

/// `Panel N:` header, anywhere in the text.
static PANEL_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpanel\s+(\d+)\s*:").expect("valid regex"));

/// Panel number at the start of a fallback header line (colon optional).
static LINE_PANEL_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^panel\s*(\d+)").expect("valid regex"));

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Raw script text as returned by the text model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComicScript(String);

impl ComicScript {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the script into exactly [`PANEL_COUNT`] panels.
    pub fn panels(&self) -> Vec<Panel> {
        parse_comic_script(&self.0)
    }
}

/// One structured panel of a strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Panel {
    /// 1-based position in the strip.
    pub number: u32,
    /// What the panel shows.
    pub visual_description: String,
    /// Speech or caption text; may be empty.
    pub dialogue: String,
    /// Text handed to the image engine (before the comic style prefix).
    pub image_prompt: String,
}

impl Panel {
    fn new(number: u32, visual: &str, dialogue: &str) -> Self {
        Self {
            number,
            visual_description: visual.to_string(),
            dialogue: dialogue.to_string(),
            image_prompt: visual.to_string(),
        }
    }

    /// Placeholder panel for a slot the script did not fill.
    pub fn placeholder(number: u32) -> Self {
        Self::new(number, PLACEHOLDER_VISUAL, PLACEHOLDER_DIALOGUE)
    }

    /// Whether this panel carries the placeholder content.
    pub fn is_placeholder(&self) -> bool {
        self.visual_description == PLACEHOLDER_VISUAL && self.dialogue == PLACEHOLDER_DIALOGUE
    }
}

// ---------------------------------------------------------------------------
// Public functions
// ---------------------------------------------------------------------------

/// Parse raw script text into exactly [`PANEL_COUNT`] panels ordered by
/// number.
///
/// Panels numbered outside `1..=PANEL_COUNT` are dropped, a repeated
/// number keeps its first occurrence, and the header pass wins over the
/// line pass for any number both of them found.
pub fn parse_comic_script(script: &str) -> Vec<Panel> {
    let mut slots = header_pass(script);

    if slots.len() < PANEL_COUNT as usize {
        tracing::debug!(
            found = slots.len(),
            "Header pass found too few panels, scanning line by line",
        );
        for (number, panel) in line_pass(script) {
            slots.entry(number).or_insert(panel);
        }
    }

    for number in 1..=PANEL_COUNT {
        slots.entry(number).or_insert_with(|| {
            tracing::debug!(panel = number, "Padding missing panel with placeholder");
            Panel::placeholder(number)
        });
    }

    // BTreeMap iteration is already ordered by panel number.
    slots.into_values().collect()
}

/// Split a panel body on its first separator into (visual, dialogue).
pub fn split_visual_dialogue(content: &str) -> (String, String) {
    match content.split_once(DIALOGUE_SEPARATOR) {
        Some((visual, dialogue)) => (clean(visual), clean(dialogue)),
        None => (clean(content), String::new()),
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Strict pass: every `Panel N:` header owns the text up to the next
/// header or the end of input.
fn header_pass(script: &str) -> BTreeMap<u32, Panel> {
    // A number too large for u32 still ends the previous body.
    let headers: Vec<(Option<u32>, usize, usize)> = PANEL_HEADER
        .captures_iter(script)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?.as_str().parse::<u32>().ok();
            Some((number, whole.start(), whole.end()))
        })
        .collect();

    let mut slots = BTreeMap::new();
    for (i, &(number, _, body_start)) in headers.iter().enumerate() {
        let body_end = headers
            .get(i + 1)
            .map(|&(_, next_start, _)| next_start)
            .unwrap_or(script.len());

        let Some(number) = number.filter(|&n| is_in_range(n)) else {
            continue;
        };

        let (visual, dialogue) = split_visual_dialogue(&script[body_start..body_end]);
        slots
            .entry(number)
            .or_insert_with(|| Panel::new(number, &visual, &dialogue));
    }
    slots
}

/// Lenient pass: a line starting with "panel" opens a panel whose
/// description is the text after its first colon; following lines are
/// appended to that panel's dialogue and image prompt.
fn line_pass(script: &str) -> BTreeMap<u32, Panel> {
    let mut slots: BTreeMap<u32, Panel> = BTreeMap::new();
    let mut current: Option<u32> = None;

    for raw_line in script.lines() {
        let line = strip_markup(raw_line);
        if line.is_empty() {
            continue;
        }

        if line.to_lowercase().starts_with("panel") {
            let Some(digits) = LINE_PANEL_NUMBER.captures(line).and_then(|caps| caps.get(1)) else {
                // A "panel" line without a number keeps the current panel open.
                continue;
            };
            let number = digits.as_str().parse::<u32>().ok().filter(|&n| is_in_range(n));

            let content = line
                .split_once(':')
                .map(|(_, rest)| clean(rest))
                .unwrap_or_default();

            if let Some(number) = number.filter(|n| !slots.contains_key(n)) {
                slots.insert(number, Panel::new(number, &content, ""));
                current = Some(number);
            } else {
                current = None;
            }
            continue;
        }

        if let Some(panel) = current.and_then(|n| slots.get_mut(&n)) {
            append_words(&mut panel.dialogue, line);
            append_words(&mut panel.image_prompt, line);
        }
    }
    slots
}

fn is_in_range(number: u32) -> bool {
    (1..=PANEL_COUNT).contains(&number)
}

fn append_words(target: &mut String, text: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

/// Trim whitespace and markdown emphasis left around a fragment.
fn clean(text: &str) -> String {
    text.trim().trim_matches('*').trim().to_string()
}

/// Trim whitespace plus leading heading/emphasis markers from a line.
fn strip_markup(line: &str) -> &str {
    line.trim()
        .trim_start_matches(|c: char| c == '#' || c == '*' || c.is_whitespace())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(panels: &[Panel]) -> Vec<u32> {
        panels.iter().map(|p| p.number).collect()
    }

    // -- header pass ----------------------------------------------------------

    #[test]
    fn well_formed_script_splits_visual_and_dialogue() {
        let script = "Panel 1: A cat sits on a roof - \"Meow.\"\n\
                      Panel 2: The cat sees a bird - \"Lunch?\"\n\
                      Panel 3: The cat leaps - \"Wheee!\"\n\
                      Panel 4: The cat lands in a puddle - \"...\"";
        let panels = parse_comic_script(script);

        assert_eq!(numbers(&panels), vec![1, 2, 3, 4]);
        assert_eq!(panels[0].visual_description, "A cat sits on a roof");
        assert_eq!(panels[0].dialogue, "\"Meow.\"");
        assert_eq!(panels[0].image_prompt, "A cat sits on a roof");
        assert_eq!(panels[3].visual_description, "The cat lands in a puddle");
        assert_eq!(panels[3].dialogue, "\"...\"");
    }

    #[test]
    fn headers_are_case_insensitive() {
        let script = "PANEL 1: a - b\npanel 2: c - d\nPaNeL 3: e\nPanel 4: f - g";
        let panels = parse_comic_script(script);
        assert_eq!(panels[1].visual_description, "c");
        assert_eq!(panels[2].visual_description, "e");
        assert_eq!(panels[2].dialogue, "");
        assert!(panels.iter().all(|p| !p.is_placeholder()));
    }

    #[test]
    fn body_spans_multiple_lines_until_next_header() {
        let script = "Panel 1: A dog\nwalks home - \"Woof\"\nPanel 2: x\nPanel 3: y\nPanel 4: z";
        let panels = parse_comic_script(script);
        assert_eq!(panels[0].visual_description, "A dog\nwalks home");
        assert_eq!(panels[0].dialogue, "\"Woof\"");
    }

    #[test]
    fn only_the_first_separator_splits() {
        let (visual, dialogue) = split_visual_dialogue(" A robot - \"Beep - boop\" ");
        assert_eq!(visual, "A robot");
        assert_eq!(dialogue, "\"Beep - boop\"");
    }

    #[test]
    fn out_of_order_headers_are_sorted() {
        let script = "Panel 3: c\nPanel 1: a\nPanel 4: d\nPanel 2: b";
        let panels = parse_comic_script(script);
        assert_eq!(numbers(&panels), vec![1, 2, 3, 4]);
        assert_eq!(panels[0].visual_description, "a");
        assert_eq!(panels[3].visual_description, "d");
    }

    #[test]
    fn extra_panels_are_dropped() {
        let script = "Panel 1: a\nPanel 2: b\nPanel 3: c\nPanel 4: d\nPanel 5: e";
        let panels = parse_comic_script(script);
        assert_eq!(panels.len(), 4);
        assert!(panels.iter().all(|p| p.visual_description != "e"));
    }

    #[test]
    fn duplicate_numbers_keep_first_occurrence() {
        let script = "Panel 1: first\nPanel 1: second\nPanel 2: b\nPanel 3: c\nPanel 4: d";
        let panels = parse_comic_script(script);
        assert_eq!(panels[0].visual_description, "first");
        assert_eq!(numbers(&panels), vec![1, 2, 3, 4]);
    }

    #[test]
    fn overflowing_panel_number_still_ends_previous_body() {
        let script = "Panel 1: a\nPanel 99999999999999999999: huge\nPanel 2: b";
        let panels = parse_comic_script(script);
        assert_eq!(panels[0].visual_description, "a");
        assert_eq!(panels[1].visual_description, "b");
        assert!(panels.iter().all(|p| !p.image_prompt.contains("huge")));
    }

    #[test]
    fn markdown_emphasis_is_trimmed() {
        let script = "**Panel 1:** A cat - \"Hi\"\n**Panel 2:** b\n**Panel 3:** c\n**Panel 4:** d";
        let panels = parse_comic_script(script);
        assert_eq!(panels[0].visual_description, "A cat");
        assert_eq!(panels[0].dialogue, "\"Hi\"");
    }

    // -- fallback pass --------------------------------------------------------

    #[test]
    fn fallback_recovers_headers_without_space_or_colon_body() {
        let script = "Panel1: A kitchen\nThe chef shouts\nPanel 2 : Smoke everywhere\n\
                      Panel 3: Firefighters arrive\nPanel 4: Everyone eats toast";
        let panels = parse_comic_script(script);

        // "Panel1:" is missed by the header pass but found line by line.
        assert_eq!(panels[0].visual_description, "A kitchen");
        assert_eq!(panels[0].dialogue, "The chef shouts");
        assert_eq!(panels[0].image_prompt, "A kitchen The chef shouts");
        // Header-pass panels are kept as they were.
        assert_eq!(panels[1].visual_description, "Smoke everywhere");
        assert!(panels.iter().all(|p| !p.is_placeholder()));
    }

    #[test]
    fn fallback_does_not_override_header_pass() {
        let script = "Panel 1: strict - yes\nPanel 2: b";
        let panels = parse_comic_script(script);
        assert_eq!(panels[0].visual_description, "strict");
        assert_eq!(panels[0].dialogue, "yes");
        assert!(panels[2].is_placeholder());
        assert!(panels[3].is_placeholder());
    }

    #[test]
    fn fallback_line_without_number_is_ignored() {
        let script = "Panels coming up\nPanel 1 - no colon here\nextra words";
        let panels = parse_comic_script(script);
        assert_eq!(panels[0].visual_description, "");
        assert_eq!(panels[0].dialogue, "extra words");
    }

    // -- padding --------------------------------------------------------------

    #[test]
    fn no_headers_yields_four_placeholders() {
        let panels = parse_comic_script("Once upon a time there was no format at all.");
        assert_eq!(numbers(&panels), vec![1, 2, 3, 4]);
        for panel in &panels {
            assert_eq!(panel.visual_description, PLACEHOLDER_VISUAL);
            assert_eq!(panel.dialogue, PLACEHOLDER_DIALOGUE);
            assert_eq!(panel.image_prompt, PLACEHOLDER_VISUAL);
        }
    }

    #[test]
    fn empty_input_yields_four_placeholders() {
        let panels = parse_comic_script("");
        assert_eq!(panels.len(), 4);
        assert!(panels.iter().all(Panel::is_placeholder));
    }

    #[test]
    fn gaps_are_padded_in_place() {
        let script = "Panel 2: b\nPanel 4: d";
        let panels = parse_comic_script(script);
        assert_eq!(numbers(&panels), vec![1, 2, 3, 4]);
        assert!(panels[0].is_placeholder());
        assert_eq!(panels[1].visual_description, "b");
        assert!(panels[2].is_placeholder());
    }

    #[test]
    fn malformed_inputs_always_give_dense_numbers() {
        let inputs = [
            "Panel 0: zero\nPanel 99999999999999999999: huge",
            "panel panel panel",
            "Panel 4: d\nPanel 4: again\nPanel 7: g",
            ":::---:::",
            "\n\n\n",
        ];
        for input in inputs {
            let panels = parse_comic_script(input);
            assert_eq!(numbers(&panels), vec![1, 2, 3, 4], "input: {input:?}");
        }
    }

    #[test]
    fn comic_script_wraps_text() {
        let script = ComicScript::new("Panel 1: a");
        assert_eq!(script.as_str(), "Panel 1: a");
        assert_eq!(script.panels().len(), 4);
    }
}
