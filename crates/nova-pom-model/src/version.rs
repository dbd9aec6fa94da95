//! Maven version ordering.
//!
//! Versions are split into numeric and qualifier items. `.` separates items,
//! `-` and transitions between digits and letters open a nested list. Trailing
//! "null" items (`0`, empty qualifiers, empty lists) are dropped, so `1`,
//! `1.0` and `1.0-ga` compare equal.
//!
//! Known qualifiers order as
//! `alpha < beta < milestone < rc < snapshot < (release) < sp`; unknown
//! qualifiers sort after `sp`, lexically among themselves.

use std::cmp::Ordering;
use std::fmt;

const QUALIFIERS: [&str; 7] = ["alpha", "beta", "milestone", "rc", "snapshot", "", "sp"];
const RELEASE_INDEX: &str = "5";

/// A version string with Maven's ordering semantics.
///
/// `Display` yields the original text.
#[derive(Clone)]
pub struct MavenVersion {
    raw: String,
    items: Vec<Item>,
}

#[derive(Debug, Clone)]
enum Item {
    /// Decimal digits without leading zeros; compared by length then text to
    /// support arbitrarily large numbers.
    Int(String),
    Str(String),
    List(Vec<Item>),
}

impl MavenVersion {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_owned(),
            items: parse_items(&raw.trim().to_lowercase()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_snapshot(&self) -> bool {
        self.raw.to_ascii_uppercase().ends_with("-SNAPSHOT")
    }
}

impl fmt::Display for MavenVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for MavenVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MavenVersion({:?})", self.raw)
    }
}

impl PartialEq for MavenVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MavenVersion {}

impl PartialOrd for MavenVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MavenVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_lists(&self.items, &other.items)
    }
}

fn parse_items(version: &str) -> Vec<Item> {
    // `depth` counts nested lists; the current list is always reached by
    // following the last element `depth` times.
    let mut root = Vec::new();
    let mut depth = 0usize;
    let mut is_digit = false;
    let mut start = 0usize;

    for (idx, ch) in version.char_indices() {
        match ch {
            '.' | '-' => {
                let item = if idx == start {
                    Item::Int(String::new())
                } else {
                    parse_item(is_digit, &version[start..idx], false)
                };
                current(&mut root, depth).push(item);
                start = idx + 1;
                if ch == '-' {
                    current(&mut root, depth).push(Item::List(Vec::new()));
                    depth += 1;
                }
            }
            c if c.is_ascii_digit() => {
                if !is_digit && idx > start {
                    current(&mut root, depth).push(parse_item(false, &version[start..idx], true));
                    start = idx;
                    current(&mut root, depth).push(Item::List(Vec::new()));
                    depth += 1;
                }
                is_digit = true;
            }
            _ => {
                if is_digit && idx > start {
                    current(&mut root, depth).push(parse_item(true, &version[start..idx], false));
                    start = idx;
                    current(&mut root, depth).push(Item::List(Vec::new()));
                    depth += 1;
                }
                is_digit = false;
            }
        }
    }
    if version.len() > start {
        current(&mut root, depth).push(parse_item(is_digit, &version[start..], false));
    }

    normalize(&mut root);
    root
}

fn current(root: &mut Vec<Item>, depth: usize) -> &mut Vec<Item> {
    let mut list = root;
    for _ in 0..depth {
        list = match list.last_mut() {
            Some(Item::List(inner)) => inner,
            // Every level is opened by pushing a list last.
            _ => unreachable!("version list nesting out of sync"),
        };
    }
    list
}

fn parse_item(is_digit: bool, text: &str, followed_by_digit: bool) -> Item {
    if is_digit {
        return Item::Int(text.trim_start_matches('0').to_owned());
    }
    let text = if followed_by_digit && text.len() == 1 {
        match text {
            "a" => "alpha",
            "b" => "beta",
            "m" => "milestone",
            other => other,
        }
    } else {
        text
    };
    let text = match text {
        "ga" | "final" | "release" => "",
        "cr" => "rc",
        other => other,
    };
    Item::Str(text.to_owned())
}

fn normalize(list: &mut Vec<Item>) {
    for item in list.iter_mut() {
        if let Item::List(inner) = item {
            normalize(inner);
        }
    }
    // Nulls are dropped from the tail, looking past non-null lists: `1.0-alpha`
    // normalizes to `1-alpha`.
    let mut idx = list.len();
    while idx > 0 {
        idx -= 1;
        if is_null(&list[idx]) {
            list.remove(idx);
        } else if !matches!(list[idx], Item::List(_)) {
            break;
        }
    }
}

fn is_null(item: &Item) -> bool {
    match item {
        Item::Int(digits) => digits.is_empty(),
        Item::Str(text) => text.is_empty(),
        Item::List(items) => items.is_empty(),
    }
}

fn comparable_qualifier(qualifier: &str) -> String {
    match QUALIFIERS.iter().position(|known| *known == qualifier) {
        Some(idx) => idx.to_string(),
        None => format!("{}-{qualifier}", QUALIFIERS.len()),
    }
}

fn compare_ints(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compares `item` against an absent item.
fn compare_to_null(item: &Item) -> Ordering {
    match item {
        Item::Int(digits) => {
            if digits.is_empty() {
                Ordering::Equal
            } else {
                Ordering::Greater
            }
        }
        Item::Str(text) => comparable_qualifier(text).as_str().cmp(RELEASE_INDEX),
        Item::List(items) => items.first().map_or(Ordering::Equal, compare_to_null),
    }
}

fn compare_items(a: &Item, b: &Item) -> Ordering {
    match (a, b) {
        (Item::Int(a), Item::Int(b)) => compare_ints(a, b),
        (Item::Int(_), _) => Ordering::Greater,
        (Item::Str(a), Item::Str(b)) => comparable_qualifier(a).cmp(&comparable_qualifier(b)),
        (Item::Str(_), _) => Ordering::Less,
        (Item::List(_), Item::Int(_)) => Ordering::Less,
        (Item::List(_), Item::Str(_)) => Ordering::Greater,
        (Item::List(a), Item::List(b)) => compare_lists(a, b),
    }
}

fn compare_lists(a: &[Item], b: &[Item]) -> Ordering {
    let len = a.len().max(b.len());
    for idx in 0..len {
        let ordering = match (a.get(idx), b.get(idx)) {
            (Some(left), Some(right)) => compare_items(left, right),
            (Some(left), None) => compare_to_null(left),
            (None, Some(right)) => compare_to_null(right).reverse(),
            (None, None) => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
