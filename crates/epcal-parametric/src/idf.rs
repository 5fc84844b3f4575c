//! Text-preserving field edits on simulator input models.
//!
//! Objects are comma separated fields terminated by `;`, with `!` starting
//! a comment that runs to end of line. Edits replace the exact byte span of
//! a field value so that layout and comments survive.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::spec::FieldChange;

/// One parsed object. `fields[0]` is the Name field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdfObject {
    pub object_type: String,
    pub fields: Vec<String>,
    spans: Vec<Range<usize>>,
}

impl IdfObject {
    pub fn name(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }

    fn matches(&self, object_type: &str, object_name: Option<&str>) -> bool {
        if !self.object_type.eq_ignore_ascii_case(object_type.trim()) {
            return false;
        }
        match object_name {
            Some(name) => self
                .name()
                .map(|n| n.eq_ignore_ascii_case(name.trim()))
                .unwrap_or(false),
            None => true,
        }
    }
}

struct Scanner {
    objects: Vec<IdfObject>,
    /// Value span of the field being scanned; `None` until a value char is seen.
    value: Option<Range<usize>>,
    /// Finished spans of the current object, type first.
    current: Vec<Range<usize>>,
}

impl Scanner {
    fn close_field(&mut self, sep_at: usize) {
        let span = self.value.take().unwrap_or(sep_at..sep_at);
        self.current.push(span);
    }

    fn close_object(&mut self, text: &str) {
        let mut spans = std::mem::take(&mut self.current).into_iter();
        let Some(type_span) = spans.next() else {
            return;
        };
        let spans: Vec<Range<usize>> = spans.collect();
        self.objects.push(IdfObject {
            object_type: text[type_span].to_string(),
            fields: spans.iter().map(|s| text[s.clone()].to_string()).collect(),
            spans,
        });
    }
}

/// Parse every object in `text`, in file order.
pub fn parse_objects(text: &str) -> Vec<IdfObject> {
    let mut scanner = Scanner {
        objects: Vec::new(),
        value: None,
        current: Vec::new(),
    };

    let mut line_start = 0;
    for line in text.split_inclusive('\n') {
        let code_len = line.find('!').unwrap_or(line.len());
        for (i, c) in line[..code_len].char_indices() {
            let at = line_start + i;
            match c {
                ',' => scanner.close_field(at),
                ';' => {
                    scanner.close_field(at);
                    scanner.close_object(text);
                }
                c if c.is_whitespace() => {}
                c => {
                    let end = at + c.len_utf8();
                    match scanner.value.as_mut() {
                        Some(span) => span.end = end,
                        None => scanner.value = Some(at..end),
                    }
                }
            }
        }
        line_start += line.len();
    }
    scanner.objects
}

/// Result of applying a variant's changes to a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub text: String,
    /// Objects that received at least one edit.
    pub objects_modified: usize,
    /// Changes whose object or field was not found.
    pub unmatched: Vec<FieldChange>,
}

/// Apply `changes` to every object matching type and name (both
/// case-insensitive). Field index 0 is the Name field.
pub fn apply_changes(text: &str, changes: &[FieldChange]) -> PatchOutcome {
    let objects = parse_objects(text);
    // Keyed by span start so a later change to the same field wins.
    let mut edits: BTreeMap<usize, (Range<usize>, &str)> = BTreeMap::new();
    let mut touched = vec![false; objects.len()];
    let mut unmatched = Vec::new();

    for change in changes {
        let mut hit = false;
        for (idx, obj) in objects.iter().enumerate() {
            if !obj.matches(&change.object_type, Some(&change.object_name)) {
                continue;
            }
            if let Some(span) = obj.spans.get(change.field_index) {
                edits.insert(span.start, (span.clone(), change.new_value.as_str()));
                touched[idx] = true;
                hit = true;
            }
        }
        if !hit {
            unmatched.push(change.clone());
        }
    }

    let mut out = text.to_string();
    for (span, value) in edits.into_values().rev() {
        out.replace_range(span, value);
    }

    PatchOutcome {
        text: out,
        objects_modified: touched.into_iter().filter(|t| *t).count(),
        unmatched,
    }
}

/// First object of `object_type` (and `object_name`, when given).
pub fn find_object<'a>(
    objects: &'a [IdfObject],
    object_type: &str,
    object_name: Option<&str>,
) -> Option<&'a IdfObject> {
    objects.iter().find(|o| o.matches(object_type, object_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "\
Version,23.2;

! glazing
WindowMaterial:SimpleGlazingSystem,
    Window_Glazing,          !- Name
    2.7,                     !- U-Factor {W/m2-K}
    0.6;                     !- Solar Heat Gain Coefficient

Material,
  Insulation, Smooth, 0.05, 0.04, 30, 1200;

Material,
  Gypsum,,0.0127,0.16,784.9,830;
";

    fn change(object_type: &str, object_name: &str, field_index: usize, new_value: &str) -> FieldChange {
        FieldChange {
            object_type: object_type.into(),
            object_name: object_name.into(),
            field_index,
            new_value: new_value.into(),
        }
    }

    #[test]
    fn parses_types_names_and_empty_fields() {
        let objs = parse_objects(MODEL);
        assert_eq!(objs.len(), 4);
        assert_eq!(objs[0].object_type, "Version");
        assert_eq!(objs[1].fields, vec!["Window_Glazing", "2.7", "0.6"]);
        assert_eq!(objs[3].fields[1], "");
        assert_eq!(objs[1].object_type, "WindowMaterial:SimpleGlazingSystem");
    }

    #[test]
    fn patch_preserves_comments_and_layout() {
        let out = apply_changes(
            MODEL,
            &[change("windowmaterial:simpleglazingsystem", "window_glazing", 1, "1.8")],
        );
        assert_eq!(out.objects_modified, 1);
        assert!(out.unmatched.is_empty());
        assert!(out.text.contains("    1.8,                     !- U-Factor {W/m2-K}"));
        assert!(out.text.contains("    0.6;"));
    }

    #[test]
    fn patch_fills_empty_field_and_reports_unmatched() {
        let out = apply_changes(
            MODEL,
            &[
                change("Material", "Gypsum", 1, "MediumSmooth"),
                change("Material", "Insulation", 3, "0.03"),
                change("Material", "Brick", 1, "Rough"),
                change("Material", "Insulation", 40, "1"),
            ],
        );
        assert!(out.text.contains("Gypsum,MediumSmooth,0.0127"));
        assert!(out.text.contains("Insulation, Smooth, 0.05, 0.03, 30"));
        assert_eq!(out.objects_modified, 2);
        assert_eq!(out.unmatched.len(), 2);
    }

    #[test]
    fn later_change_to_same_field_wins() {
        let out = apply_changes(
            MODEL,
            &[
                change("Material", "Insulation", 2, "0.10"),
                change("Material", "Insulation", 2, "0.20"),
            ],
        );
        assert!(out.text.contains("Smooth, 0.20, 0.04"));
    }

    #[test]
    fn find_object_matches_case_insensitively() {
        let objs = parse_objects(MODEL);
        let found = find_object(&objs, "MATERIAL", Some("gypsum")).unwrap();
        assert_eq!(found.fields[2], "0.0127");
        assert_eq!(find_object(&objs, "Material", None).unwrap().name(), Some("Insulation"));
        assert!(find_object(&objs, "Construction", None).is_none());
    }
}
