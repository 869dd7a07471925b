//! `status.xml` document parsing
//!
//! The controller answers with a flat document such as
//! `<response><led0>1</led0><btn0>up</btn0><an1>512</an1>...</response>`.
//! Tag numbering is 0-based on some firmwares and 1-based on others, and a
//! few variants use alias names, so each channel family is read in passes.

use crate::analog::AnalogScaling;
use crate::error::ProtocolError;
use std::collections::HashMap;

const DIGITAL_ALIASES: [&str; 3] = ["input", "in", "din"];
const ANALOG_PREFIXES: [&str; 3] = ["an", "ana", "analog"];
const OUTPUT_ALIASES: [&str; 3] = ["relay", "out", "rly"];

/// Parsed status document: element name to element text
#[derive(Debug, Clone, Default)]
pub struct StatusDocument {
    values: HashMap<String, String>,
}

/// Which digital/analog tag families a document carries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentTags {
    pub btn_zero_based: Vec<String>,
    pub btn_one_based: Vec<String>,
    pub analog_zero_based: Vec<String>,
    pub analog_one_based: Vec<String>,
}

impl StatusDocument {
    /// Parse a status document, retrying once with control characters removed
    pub fn parse(xml: &str) -> Result<Self, ProtocolError> {
        match Self::parse_strict(xml) {
            Ok(doc) => Ok(doc),
            Err(first) => {
                let cleaned = strip_control_chars(xml);
                if cleaned.len() == xml.len() {
                    return Err(first);
                }
                tracing::debug!("Retrying status parse without control characters");
                Self::parse_strict(&cleaned)
            }
        }
    }

    fn parse_strict(xml: &str) -> Result<Self, ProtocolError> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let values = doc
            .root_element()
            .children()
            .filter(|n| n.is_element())
            .filter_map(|n| {
                n.text()
                    .map(|t| (n.tag_name().name().to_string(), t.to_string()))
            })
            .collect();

        Ok(Self { values })
    }

    /// Text of a direct child element, if present
    #[must_use]
    pub fn text(&self, tag: &str) -> Option<&str> {
        self.values.get(tag).map(String::as_str)
    }

    /// Number of elements carrying text
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn first_text(&self, prefixes: &[&str], n: usize) -> Option<&str> {
        prefixes
            .iter()
            .find_map(|p| self.text(&format!("{p}{n}")))
    }

    /// Read `max` digital inputs (index 0 = first channel)
    #[must_use]
    pub fn digital_inputs(&self, max: usize) -> Vec<bool> {
        let raw = self
            .read_pass(max, &["btn"], 0)
            .or_else(|| self.read_pass(max, &["btn"], 1))
            .or_else(|| self.read_pass(max, &DIGITAL_ALIASES, 0))
            .or_else(|| self.read_pass(max, &DIGITAL_ALIASES, 1))
            .unwrap_or_else(|| vec![None; max]);

        raw.into_iter().map(button_text_to_bool).collect()
    }

    /// Read `max` analog inputs normalized with `scaling`
    #[must_use]
    pub fn analog_inputs(&self, max: usize, scaling: &AnalogScaling) -> Vec<Option<f64>> {
        let read = |offset: usize| -> Vec<Option<f64>> {
            (0..max)
                .map(|i| {
                    self.first_text(&ANALOG_PREFIXES, i + offset)
                        .and_then(parse_number)
                        .map(|v| scaling.normalize(v))
                })
                .collect()
        };

        let one_based = read(1);
        if one_based.iter().any(Option::is_some) {
            one_based
        } else {
            read(0)
        }
    }

    /// Read `max` relay output states (index 0 = relay 1)
    #[must_use]
    pub fn outputs(&self, max: usize) -> Vec<bool> {
        let raw = self
            .read_pass(max, &["led"], 0)
            .or_else(|| self.read_pass(max, &["led"], 1))
            .or_else(|| self.read_pass(max, &OUTPUT_ALIASES, 0))
            .or_else(|| self.read_pass(max, &OUTPUT_ALIASES, 1))
            .unwrap_or_else(|| vec![None; max]);

        raw.into_iter().map(relay_text_to_bool).collect()
    }

    /// Read one numbering pass; `None` when no tag of the pass is present
    fn read_pass(&self, max: usize, prefixes: &[&str], offset: usize) -> Option<Vec<Option<&str>>> {
        let values: Vec<Option<&str>> = (0..max)
            .map(|i| self.first_text(prefixes, i + offset))
            .collect();
        values.iter().any(Option::is_some).then_some(values)
    }

    /// Report which btn / analog tags exist, for debugging firmware variants
    #[must_use]
    pub fn present_tags(&self, max_buttons: usize, max_analogs: usize) -> PresentTags {
        let present = |names: Vec<String>| -> Vec<String> {
            names.into_iter().filter(|n| self.values.contains_key(n)).collect()
        };
        let analog_names = |range: std::ops::Range<usize>| -> Vec<String> {
            range
                .flat_map(|i| ANALOG_PREFIXES.iter().map(move |p| format!("{p}{i}")))
                .collect()
        };

        PresentTags {
            btn_zero_based: present((0..max_buttons).map(|i| format!("btn{i}")).collect()),
            btn_one_based: present((1..=max_buttons).map(|i| format!("btn{i}")).collect()),
            analog_zero_based: present(analog_names(0..max_analogs)),
            analog_one_based: present(analog_names(1..max_analogs + 1)),
        }
    }
}

fn strip_control_chars(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(*c, '\u{00}'..='\u{08}' | '\u{0b}' | '\u{0c}' | '\u{0e}'..='\u{1f}'))
        .collect()
}

/// Buttons report "down"/"up" on most firmwares, 1/0 or on/off on others
fn button_text_to_bool(txt: Option<&str>) -> bool {
    txt.map(|t| t.trim().to_ascii_lowercase())
        .is_some_and(|t| matches!(t.as_str(), "down" | "1" | "on" | "pressed" | "true"))
}

fn relay_text_to_bool(txt: Option<&str>) -> bool {
    txt.map(|t| t.trim().to_ascii_lowercase())
        .is_some_and(|t| matches!(t.as_str(), "1" | "on" | "true" | "closed" | "energized"))
}

/// Parse a float, tolerating a decimal comma
fn parse_number(txt: &str) -> Option<f64> {
    let t = txt.trim().replace(',', ".");
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analog::AnalogMode;

    const RAW: AnalogScaling = AnalogScaling {
        mode: AnalogMode::Raw,
        vref: 3.3,
        resolution: 1023,
    };

    #[test]
    fn test_zero_based_buttons() {
        let doc = StatusDocument::parse(
            "<response><btn0>up</btn0><btn1>dn</btn1><btn2>DOWN</btn2></response>",
        )
        .unwrap();
        assert_eq!(doc.digital_inputs(4), vec![false, false, true, false]);
    }

    #[test]
    fn test_one_based_buttons() {
        // Only btn{max} present: the 0-based pass finds nothing
        let doc = StatusDocument::parse("<response><btn3>on</btn3></response>").unwrap();
        assert_eq!(doc.digital_inputs(3), vec![false, false, true]);
    }

    #[test]
    fn test_zero_based_pass_wins_when_tags_overlap() {
        let doc = StatusDocument::parse("<response><btn1>1</btn1><btn3>on</btn3></response>")
            .unwrap();
        assert_eq!(doc.digital_inputs(3), vec![false, true, false]);
    }

    #[test]
    fn test_button_aliases() {
        let doc = StatusDocument::parse("<response><in0>pressed</in0><din1>0</din1></response>")
            .unwrap();
        assert_eq!(doc.digital_inputs(2), vec![true, false]);
    }

    #[test]
    fn test_missing_buttons_read_false() {
        let doc = StatusDocument::parse("<response><led0>1</led0></response>").unwrap();
        assert_eq!(doc.digital_inputs(3), vec![false, false, false]);
    }

    #[test]
    fn test_analog_one_based_with_comma() {
        let doc = StatusDocument::parse(
            "<response><an1>1,5</an1><analog2>x</analog2><ana3>7</ana3></response>",
        )
        .unwrap();
        assert_eq!(doc.analog_inputs(4, &RAW), vec![Some(1.5), None, Some(7.0), None]);
    }

    #[test]
    fn test_analog_zero_based_fallback() {
        let doc = StatusDocument::parse("<response><an0>2.25</an0></response>").unwrap();
        assert_eq!(doc.analog_inputs(2, &RAW), vec![Some(2.25), None]);
    }

    #[test]
    fn test_outputs_zero_and_one_based() {
        let zero = StatusDocument::parse("<response><led0>1</led0><led1>0</led1></response>")
            .unwrap();
        assert_eq!(zero.outputs(3), vec![true, false, false]);

        let one = StatusDocument::parse("<response><led2>on</led2></response>").unwrap();
        assert_eq!(one.outputs(2), vec![false, true]);
    }

    #[test]
    fn test_output_aliases() {
        let zero = StatusDocument::parse("<response><relay1>closed</relay1></response>").unwrap();
        assert_eq!(zero.outputs(2), vec![false, true]);

        let one = StatusDocument::parse("<response><rly2>energized</rly2></response>").unwrap();
        assert_eq!(one.outputs(2), vec![false, true]);
        assert_eq!(one.outputs(1), vec![false]);
    }

    #[test]
    fn test_control_characters_are_stripped() {
        let doc = StatusDocument::parse("<response><btn0>down\u{01}</btn0></response>").unwrap();
        assert_eq!(doc.digital_inputs(1), vec![true]);
    }

    #[test]
    fn test_malformed_document() {
        let err = StatusDocument::parse("<response><btn0>").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_present_tags() {
        let doc = StatusDocument::parse(
            "<response><btn0>up</btn0><an1>3</an1><analog0>1</analog0></response>",
        )
        .unwrap();
        let tags = doc.present_tags(2, 2);
        assert_eq!(tags.btn_zero_based, vec!["btn0"]);
        assert!(tags.btn_one_based.is_empty());
        assert_eq!(tags.analog_zero_based, vec!["analog0", "an1"]);
        assert_eq!(tags.analog_one_based, vec!["an1"]);
    }
}
