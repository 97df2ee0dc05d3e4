//! First-letter group buckets.
//!
//! Name listings (artists, actors, directors, song titles) are kept
//! shallow by bucketing on the first character. Buckets are a fixed
//! table; membership is decided in-process because the bucket
//! conditions are not plain prefix matches for every bucket.

pub const GROUP_PREFIX: &str = "~group~";

pub struct Group {
    pub id: &'static str,
    pub label: &'static str,
}

pub const GROUPS: &[Group] = &[
    Group { id: "~group~0-9", label: "0-9" },
    Group { id: "~group~a", label: "A" },
    Group { id: "~group~b", label: "B" },
    Group { id: "~group~c", label: "C" },
    Group { id: "~group~d", label: "D" },
    Group { id: "~group~e", label: "E" },
    Group { id: "~group~f", label: "F" },
    Group { id: "~group~g", label: "G" },
    Group { id: "~group~h", label: "H" },
    Group { id: "~group~i", label: "I" },
    Group { id: "~group~j", label: "J" },
    Group { id: "~group~k", label: "K" },
    Group { id: "~group~l", label: "L" },
    Group { id: "~group~m", label: "M" },
    Group { id: "~group~n", label: "N" },
    Group { id: "~group~o", label: "O" },
    Group { id: "~group~p", label: "P" },
    Group { id: "~group~q", label: "Q" },
    Group { id: "~group~r", label: "R" },
    Group { id: "~group~s", label: "S" },
    Group { id: "~group~t", label: "T" },
    Group { id: "~group~u", label: "U" },
    Group { id: "~group~v", label: "V" },
    Group { id: "~group~w", label: "W" },
    Group { id: "~group~x", label: "X" },
    Group { id: "~group~y", label: "Y" },
    Group { id: "~group~z", label: "Z" },
    Group { id: "~group~others", label: "Others" },
];

pub fn is_group_id(seg: &str) -> bool {
    seg.starts_with(GROUP_PREFIX)
}

/// Does `name` belong to the bucket `group_id`?
pub fn matches(group_id: &str, name: &str) -> bool {
    let id = match group_id.strip_prefix(GROUP_PREFIX) {
        Some(id) => id,
        None => return false,
    };

    let first = name.chars().next();

    match id {
        "0-9" => first.map_or(false, |c| c.is_ascii_digit()),
        "others" => first.map_or(true, |c| !c.is_ascii_alphanumeric()),
        _ => {
            let letter = match id.chars().next() {
                Some(c) if id.len() == 1 && c.is_ascii_lowercase() => c,
                _ => return false,
            };
            first.map_or(false, |c| c.to_ascii_lowercase() == letter)
        }
    }
}

/// Bucket id a name belongs to.
pub fn group_of(name: &str) -> Option<&'static str> {
    GROUPS.iter().find(|g| matches(g.id, name)).map(|g| g.id)
}

pub fn label(group_id: &str) -> Option<&'static str> {
    GROUPS
        .iter()
        .find(|g| g.id == group_id)
        .map(|g| g.label)
}

/// SQL condition selecting bucket members, appended after a column
/// reference ("NAME GLOB '[aA]*'").
pub fn condition(group_id: &str) -> Option<String> {
    let id = group_id.strip_prefix(GROUP_PREFIX)?;

    match id {
        "0-9" => Some(" GLOB '[0-9]*'".to_string()),
        "others" => Some(" NOT GLOB '[0-9a-zA-Z]*'".to_string()),
        _ => {
            let c = id.chars().next()?;
            if id.len() == 1 && c.is_ascii_lowercase() {
                Some(format!(" GLOB '[{}{}]*'", c, c.to_ascii_uppercase()))
            } else {
                None
            }
        }
    }
}

/// Number of non-empty buckets over a name list.
pub fn num_groups<S: AsRef<str>>(names: &[S]) -> i64 {
    GROUPS
        .iter()
        .filter(|g| names.iter().any(|n| matches(g.id, n.as_ref())))
        .count() as i64
}

/// Number of names falling into one bucket.
pub fn group_size<S: AsRef<str>>(names: &[S], group_id: &str) -> i64 {
    names
        .iter()
        .filter(|n| matches(group_id, n.as_ref()))
        .count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(group_of("Foo"), Some("~group~f"));
        assert_eq!(group_of("foo"), Some("~group~f"));
        assert_eq!(group_of("2raumwohnung"), Some("~group~0-9"));
        assert_eq!(group_of("Éliane"), Some("~group~others"));
        assert_eq!(group_of(""), Some("~group~others"));
    }

    #[test]
    fn bucket_membership() {
        assert!(matches("~group~a", "Abba"));
        assert!(matches("~group~a", "abba"));
        assert!(!matches("~group~a", "Beatles"));
        assert!(matches("~group~0-9", "10cc"));
        assert!(!matches("~group~0-9", "Ten"));
        assert!(matches("~group~others", "...And Oceans"));
        assert!(!matches("bogus", "Abba"));
    }

    #[test]
    fn group_counting() {
        let names = ["Abba", "angelo", "Beatles", "10cc", "なごむ"];
        assert_eq!(num_groups(&names), 4);
        assert_eq!(group_size(&names, "~group~a"), 2);
        assert_eq!(group_size(&names, "~group~b"), 1);
        assert_eq!(group_size(&names, "~group~others"), 1);
        assert_eq!(group_size(&names, "~group~z"), 0);
    }

    #[test]
    fn sql_conditions() {
        assert_eq!(condition("~group~f").unwrap(), " GLOB '[fF]*'");
        assert_eq!(condition("~group~0-9").unwrap(), " GLOB '[0-9]*'");
        assert_eq!(
            condition("~group~others").unwrap(),
            " NOT GLOB '[0-9a-zA-Z]*'"
        );
        assert!(condition("nonsense").is_none());
    }

    #[test]
    fn every_bucket_has_a_label() {
        for g in GROUPS {
            assert_eq!(label(g.id), Some(g.label));
        }
    }
}
