use serde::Serialize;

/// Buttons per side of a panel.
pub const BUTTONS_PER_SIDE: usize = 6;

/// Soft-key labels of a panel: six on the left edge, six on the right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ButtonLabels {
    pub left: [Option<String>; BUTTONS_PER_SIDE],
    pub right: [Option<String>; BUTTONS_PER_SIDE],
}

#[derive(Serialize)]
struct LabelSnapshot<'a> {
    left: [&'a str; BUTTONS_PER_SIDE],
    right: [&'a str; BUTTONS_PER_SIDE],
}

impl ButtonLabels {
    /// Build labels from button slots numbered 0..12 (left 0-5, right 6-11).
    pub fn from_slots<I, S>(slots: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        let mut labels = Self::default();
        for (slot, label) in slots.into_iter().take(BUTTONS_PER_SIDE * 2).enumerate() {
            let label = label.map(Into::into);
            if slot < BUTTONS_PER_SIDE {
                labels.left[slot] = label;
            } else {
                labels.right[slot - BUTTONS_PER_SIDE] = label;
            }
        }
        labels
    }

    /// `{"left":[..6..],"right":[..6..]}`, unset slots as empty strings.
    pub fn to_json(&self) -> String {
        let snapshot = LabelSnapshot {
            left: side(&self.left),
            right: side(&self.right),
        };
        // Serializing string arrays cannot fail.
        serde_json::to_string(&snapshot).unwrap_or_default()
    }
}

fn side(labels: &[Option<String>; BUTTONS_PER_SIDE]) -> [&str; BUTTONS_PER_SIDE] {
    let mut out = [""; BUTTONS_PER_SIDE];
    for (dst, src) in out.iter_mut().zip(labels) {
        *dst = src.as_deref().unwrap_or("");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_labels_json() {
        assert_eq!(
            ButtonLabels::default().to_json(),
            r#"{"left":["","","","","",""],"right":["","","","","",""]}"#
        );
    }

    #[test]
    fn slots_split_into_sides() {
        let labels = ButtonLabels::from_slots([
            Some("NAV"),
            None,
            Some("WPT"),
            None,
            None,
            None,
            Some("ZOOM"),
            None,
            None,
            None,
            None,
            Some("BACK"),
        ]);
        assert_eq!(labels.left[0].as_deref(), Some("NAV"));
        assert_eq!(labels.left[2].as_deref(), Some("WPT"));
        assert_eq!(labels.right[0].as_deref(), Some("ZOOM"));
        assert_eq!(labels.right[5].as_deref(), Some("BACK"));
        assert_eq!(
            labels.to_json(),
            r#"{"left":["NAV","","WPT","","",""],"right":["ZOOM","","","","","BACK"]}"#
        );
    }

    #[test]
    fn labels_are_json_escaped() {
        let labels = ButtonLabels::from_slots([Some("A\"B")]);
        let value: serde_json::Value = serde_json::from_str(&labels.to_json()).unwrap();
        assert_eq!(value["left"][0], "A\"B");
    }
}
