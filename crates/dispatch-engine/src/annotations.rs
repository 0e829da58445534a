//! Machine-readable markers embedded in answer text.
//!
//! ```text
//! <!--suggestions:["Show overdue tasks", "Compare stations"]-->
//! <!--actions:[{"label": "Open grid", "route": "/grid"}]-->
//! ```
//!
//! Tag names are case-insensitive and whitespace around the tag and payload
//! is allowed. HTML comments with any other content are left in place.

use serde::de::DeserializeOwned;

use dispatch_core::SuggestedAction;

use crate::error::AnnotationError;

const OPEN: &str = "<!--";
const CLOSE: &str = "-->";
const SUGGESTIONS: &str = "suggestions";
const ACTIONS: &str = "actions";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Annotations {
    pub suggestions: Vec<String>,
    pub actions: Vec<SuggestedAction>,
}

impl Annotations {
    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty() && self.actions.is_empty()
    }
}

/// Answer text with markers removed, plus what they carried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedAnswer {
    pub text: String,
    pub annotations: Annotations,
}

/// Strip every annotation marker from `raw`.
pub fn extract(raw: &str) -> Result<ExtractedAnswer, AnnotationError> {
    let mut text = String::with_capacity(raw.len());
    let mut annotations = Annotations::default();
    let mut rest = raw;
    let mut consumed = 0;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some((tag, body_offset)) = marker_tag(after_open) else {
            // Not ours: keep the comment opener and continue after it.
            text.push_str(&rest[..start + OPEN.len()]);
            consumed += start + OPEN.len();
            rest = after_open;
            continue;
        };

        let body = &after_open[body_offset..];
        let Some(end) = body.find(CLOSE) else {
            return Err(AnnotationError::Unterminated {
                tag,
                offset: consumed + start,
            });
        };
        let payload = body[..end].trim();
        match tag {
            SUGGESTIONS => annotations.suggestions.extend(parse_payload::<String>(tag, payload)?),
            _ => annotations.actions.extend(parse_payload::<SuggestedAction>(tag, payload)?),
        }

        text.push_str(&rest[..start]);
        let marker_len = OPEN.len() + body_offset + end + CLOSE.len();
        consumed += start + marker_len;
        rest = &rest[start + marker_len..];
    }
    text.push_str(rest);

    Ok(ExtractedAnswer {
        text: text.trim_end().to_string(),
        annotations,
    })
}

/// Recognise `suggestions:` or `actions:` at the start of a comment body.
/// Returns the tag and the byte offset just past the colon.
fn marker_tag(after_open: &str) -> Option<(&'static str, usize)> {
    let leading = after_open.len() - after_open.trim_start().len();
    let candidate = &after_open[leading..];
    for tag in [SUGGESTIONS, ACTIONS] {
        let Some(head) = candidate.get(..tag.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(tag) {
            continue;
        }
        let after_tag = &candidate[tag.len()..];
        let gap = after_tag.len() - after_tag.trim_start().len();
        if after_tag[gap..].starts_with(':') {
            return Some((tag, leading + tag.len() + gap + 1));
        }
    }
    None
}

fn parse_payload<T: DeserializeOwned>(
    tag: &'static str,
    payload: &str,
) -> Result<Vec<T>, AnnotationError> {
    serde_json::from_str::<Vec<T>>(payload).map_err(|e| AnnotationError::InvalidPayload {
        tag,
        detail: e.to_string(),
    })
}

/// Cleaned text followed by canonical markers for `annotations`.
pub fn render(text: &str, annotations: &Annotations) -> String {
    let mut out = text.trim_end().to_string();
    if !annotations.suggestions.is_empty() {
        push_marker(&mut out, SUGGESTIONS, &annotations.suggestions);
    }
    if !annotations.actions.is_empty() {
        push_marker(&mut out, ACTIONS, &annotations.actions);
    }
    out
}

fn push_marker<T: serde::Serialize>(out: &mut String, tag: &str, items: &[T]) {
    let Ok(json) = serde_json::to_string(items) else {
        return;
    };
    // '>' only occurs inside JSON strings, so escaping it keeps "-->" out of
    // the payload.
    let json = json.replace('>', "\\u003e");
    out.push_str(if out.is_empty() { "" } else { "\n\n" });
    out.push_str(OPEN);
    out.push_str(tag);
    out.push(':');
    out.push_str(&json);
    out.push_str(CLOSE);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(label: &str, route: &str) -> SuggestedAction {
        SuggestedAction {
            label: label.into(),
            route: route.into(),
        }
    }

    #[test]
    fn plain_text_passes_through() {
        let out = extract("The margin is 14%.\n").unwrap();
        assert_eq!(out.text, "The margin is 14%.");
        assert!(out.annotations.is_empty());
    }

    #[test]
    fn both_markers_are_stripped() {
        let raw = "Margin is healthy.\n\n<!--suggestions:[\"Show trend\",\"Compare stations\"]-->\n<!--actions:[{\"label\":\"Open grid\",\"route\":\"/grid\"}]-->\n";
        let out = extract(raw).unwrap();
        assert_eq!(out.text, "Margin is healthy.");
        assert_eq!(out.annotations.suggestions, vec!["Show trend", "Compare stations"]);
        assert_eq!(out.annotations.actions, vec![action("Open grid", "/grid")]);
    }

    #[test]
    fn tags_are_case_insensitive_and_whitespace_tolerant() {
        let raw = "ok <!-- Suggestions : [ \"a\" ] --> done";
        let out = extract(raw).unwrap();
        assert_eq!(out.text, "ok  done");
        assert_eq!(out.annotations.suggestions, vec!["a"]);
    }

    #[test]
    fn unrelated_comments_are_kept() {
        let raw = "keep <!-- note: internal --> this <!--actions:[]-->";
        let out = extract(raw).unwrap();
        assert_eq!(out.text, "keep <!-- note: internal --> this");
        assert!(out.annotations.actions.is_empty());
    }

    #[test]
    fn unterminated_marker_is_an_error() {
        let err = extract("text <!--suggestions:[\"a\"]").unwrap_err();
        assert_eq!(err, AnnotationError::Unterminated { tag: "suggestions", offset: 5 });
    }

    #[test]
    fn offset_accounts_for_skipped_comments() {
        let err = extract("<!-- x --> <!--actions:[").unwrap_err();
        assert_eq!(err, AnnotationError::Unterminated { tag: "actions", offset: 11 });
    }

    #[test]
    fn wrong_payload_shape_is_an_error() {
        assert!(matches!(
            extract("<!--suggestions:{\"a\":1}-->"),
            Err(AnnotationError::InvalidPayload { tag: "suggestions", .. })
        ));
        assert!(matches!(
            extract("<!--actions:[{\"label\":\"x\"}]-->"),
            Err(AnnotationError::InvalidPayload { tag: "actions", .. })
        ));
    }

    #[test]
    fn render_produces_canonical_markers() {
        let annotations = Annotations {
            suggestions: vec!["Show trend".into()],
            actions: vec![action("Open grid", "/grid")],
        };
        let rendered = render("Margin is healthy.", &annotations);
        assert_eq!(
            rendered,
            "Margin is healthy.\n\n<!--suggestions:[\"Show trend\"]-->\n\n<!--actions:[{\"label\":\"Open grid\",\"route\":\"/grid\"}]-->"
        );
        let back = extract(&rendered).unwrap();
        assert_eq!(back.text, "Margin is healthy.");
        assert_eq!(back.annotations, annotations);
    }

    #[test]
    fn render_escapes_comment_terminators() {
        let annotations = Annotations {
            suggestions: vec!["a --> b".into()],
            actions: vec![],
        };
        let rendered = render("x", &annotations);
        assert_eq!(rendered.matches(CLOSE).count(), 1);
        assert_eq!(extract(&rendered).unwrap().annotations, annotations);
    }

    #[test]
    fn render_without_annotations_is_just_text() {
        assert_eq!(render("hello  \n", &Annotations::default()), "hello");
    }
}
