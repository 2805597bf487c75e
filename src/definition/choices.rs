use super::{AttributeId, Choice, ChoiceDraft, ChoiceId};
use crate::core::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceEntry {
    Option { value: Value, label: String },
    Group { label: String, options: Vec<(Value, String)> },
}

/// Legal values of an attribute, in the nested shape a selector expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceSet {
    Flat(Vec<(Value, String)>),
    Grouped(Vec<ChoiceEntry>),
}

impl ChoiceSet {
    /// Builds the set from choice rows. Rows are ordered by position first;
    /// grouped rows are then gathered under their group in order of the
    /// group's first appearance. Returns `None` when there are no rows.
    pub fn resolve<'a>(choices: impl IntoIterator<Item = &'a Choice>) -> Option<Self> {
        let mut rows: Vec<&Choice> = choices.into_iter().collect();
        if rows.is_empty() {
            return None;
        }
        rows.sort_by_key(|c| (c.position, c.id));

        if rows.iter().all(|c| c.group.is_none()) {
            return Some(Self::Flat(
                rows.into_iter()
                    .map(|c| (c.value.clone(), c.label.clone()))
                    .collect(),
            ));
        }

        let mut entries: Vec<ChoiceEntry> = Vec::new();
        for choice in rows {
            let pair = (choice.value.clone(), choice.label.clone());
            match &choice.group {
                None => entries.push(ChoiceEntry::Option { value: pair.0, label: pair.1 }),
                Some(group) => {
                    let existing = entries.iter().position(
                        |e| matches!(e, ChoiceEntry::Group { label, .. } if label == group),
                    );
                    match existing {
                        Some(idx) => {
                            if let ChoiceEntry::Group { options, .. } = &mut entries[idx] {
                                options.push(pair);
                            }
                        }
                        None => entries.push(ChoiceEntry::Group {
                            label: group.clone(),
                            options: vec![pair],
                        }),
                    }
                }
            }
        }
        Some(Self::Grouped(entries))
    }

    /// Builds the set from drafts, positioned in the order given.
    pub fn from_drafts(drafts: &[ChoiceDraft]) -> Option<Self> {
        let rows: Vec<Choice> = drafts
            .iter()
            .enumerate()
            .map(|(i, draft)| Choice {
                id: ChoiceId(i as u64),
                attribute: AttributeId(0),
                position: i as i64,
                group: draft.group.clone(),
                value: draft.value.clone(),
                label: draft.label.clone(),
            })
            .collect();
        Self::resolve(&rows)
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.values().into_iter().any(|v| v == value)
    }

    pub fn values(&self) -> Vec<&Value> {
        match self {
            Self::Flat(pairs) => pairs.iter().map(|(v, _)| v).collect(),
            Self::Grouped(entries) => {
                let mut values = Vec::new();
                for entry in entries {
                    match entry {
                        ChoiceEntry::Option { value, .. } => values.push(value),
                        ChoiceEntry::Group { options, .. } => values.extend(options.iter().map(|(v, _)| v)),
                    }
                }
                values
            }
        }
    }

    pub fn label_for(&self, value: &Value) -> Option<&str> {
        match self {
            Self::Flat(pairs) => pairs.iter().find(|(v, _)| v == value).map(|(_, l)| l.as_str()),
            Self::Grouped(entries) => entries.iter().find_map(|entry| match entry {
                ChoiceEntry::Option { value: v, label } => (v == value).then_some(label.as_str()),
                ChoiceEntry::Group { options, .. } => {
                    options.iter().find(|(v, _)| v == value).map(|(_, l)| l.as_str())
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(id: u64, position: i64, group: Option<&str>, value: &str) -> Choice {
        Choice {
            id: ChoiceId(id),
            attribute: AttributeId(1),
            position,
            group: group.map(str::to_string),
            value: Value::from(value),
            label: value.to_uppercase(),
        }
    }

    #[test]
    fn test_flat_when_no_groups() {
        let rows = [choice(1, 2, None, "b"), choice(2, 1, None, "a")];
        let set = ChoiceSet::resolve(&rows).unwrap();
        assert_eq!(
            set,
            ChoiceSet::Flat(vec![(Value::from("a"), "A".into()), (Value::from("b"), "B".into())])
        );
    }

    #[test]
    fn test_grouped_by_first_appearance() {
        let rows = [
            choice(1, 1, Some("audio"), "cd"),
            choice(2, 2, Some("video"), "dvd"),
            choice(3, 3, Some("audio"), "vinyl"),
            choice(4, 4, None, "unknown"),
        ];
        let set = ChoiceSet::resolve(&rows).unwrap();
        let ChoiceSet::Grouped(entries) = &set else {
            panic!("expected grouped choices");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            ChoiceEntry::Group {
                label: "audio".into(),
                options: vec![(Value::from("cd"), "CD".into()), (Value::from("vinyl"), "VINYL".into())],
            }
        );
        assert!(set.contains(&Value::from("unknown")));
        assert_eq!(set.label_for(&Value::from("dvd")), Some("DVD"));
        assert!(!set.contains(&Value::from("tape")));
    }

    #[test]
    fn test_empty_is_none() {
        assert!(ChoiceSet::resolve(std::iter::empty::<&Choice>()).is_none());
    }
}
