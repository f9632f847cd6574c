// ── Device name grouping ──
//
// Deterministic clustering of device names into UI groups by shared naming
// prefix. Output depends only on the *set* of names: any permutation or
// duplication of the input yields the same grouping.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Label of the synthetic group holding every unassigned name.
pub const OTHERS_LABEL: &str = "Others";

/// Shortest prefix (in chars) that may become a group label.
const MIN_PREFIX_CHARS: usize = 3;

/// Which heuristic assigns names to groups.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum GroupingStrategy {
    /// Most frequent shared camel-case prefix.
    #[default]
    PrefixFrequency,
    /// Leading camel-case word, shared by at least two names.
    LeadingWord,
}

/// One group of device names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub label: String,
    /// Sorted lexicographically.
    pub members: Vec<String>,
    /// `true` only for the trailing `Others` group.
    pub synthetic: bool,
}

/// Result of grouping a set of names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grouping {
    /// Every input name mapped to its label, `None` when it fell into `Others`.
    pub assignments: BTreeMap<String, Option<String>>,
    /// Ordered by label, with `Others` last.
    pub groups: Vec<Group>,
}

impl Grouping {
    pub fn label_of(&self, name: &str) -> Option<&str> {
        self.assignments.get(name)?.as_deref()
    }

    pub fn group(&self, label: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.label == label && !g.synthetic)
    }

    pub fn others(&self) -> Option<&Group> {
        self.groups.iter().find(|g| g.synthetic)
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Groups device names with a configured strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupingEngine {
    strategy: GroupingStrategy,
}

impl GroupingEngine {
    pub fn new(strategy: GroupingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> GroupingStrategy {
        self.strategy
    }

    pub fn group<I, S>(&self, names: I) -> Grouping
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names.into_iter().map(|n| n.as_ref().to_owned()).collect();
        let assignments = match self.strategy {
            GroupingStrategy::PrefixFrequency => assign_by_prefix_frequency(&names),
            GroupingStrategy::LeadingWord => assign_by_leading_word(&names),
        };
        build_grouping(assignments)
    }
}

// ── Prefix frequency ─────────────────────────────────────────────────

/// Every prefix ending right before an internal upper-case letter, plus
/// the full name, keeping those at least `MIN_PREFIX_CHARS` long.
fn candidate_prefixes(name: &str) -> BTreeSet<&str> {
    let mut candidates = BTreeSet::new();
    for (char_index, (byte_index, c)) in name.char_indices().enumerate() {
        if char_index >= MIN_PREFIX_CHARS && c.is_uppercase() {
            candidates.insert(&name[..byte_index]);
        }
    }
    if name.chars().count() >= MIN_PREFIX_CHARS {
        candidates.insert(name);
    }
    candidates
}

fn assign_by_prefix_frequency(names: &BTreeSet<String>) -> BTreeMap<String, Option<String>> {
    let per_name: Vec<(&String, BTreeSet<&str>)> = names
        .iter()
        .map(|name| (name, candidate_prefixes(name)))
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, candidates) in &per_name {
        for candidate in candidates {
            *counts.entry(*candidate).or_default() += 1;
        }
    }

    per_name
        .iter()
        .map(|(name, candidates)| {
            let best = candidates
                .iter()
                .map(|c| (*c, counts.get(c).copied().unwrap_or(0)))
                .filter(|(_, count)| *count >= 2)
                // Highest count, then longest, then lexicographically smallest.
                .max_by(|(a, ca), (b, cb)| {
                    ca.cmp(cb)
                        .then_with(|| a.chars().count().cmp(&b.chars().count()))
                        .then_with(|| b.cmp(a))
                })
                .map(|(c, _)| c.to_owned());
            ((*name).clone(), best)
        })
        .collect()
}

// ── Leading word ─────────────────────────────────────────────────────

/// First camel-case word of `name`. A run of capitals counts as one word
/// (`"TVRoomLamp"` → `"TV"`); `_`, `-`, `.` and whitespace end the word.
fn leading_word(name: &str) -> &str {
    let chars: Vec<(usize, char)> = name.char_indices().collect();
    let is_boundary = |c: char| !c.is_alphanumeric();

    let Some(&(_, first)) = chars.first() else {
        return "";
    };
    if is_boundary(first) {
        return "";
    }

    let upper_run = chars
        .iter()
        .take_while(|(_, c)| c.is_uppercase())
        .count();

    let end_char = if upper_run > 1 {
        // "TVRoom": the last capital of the run starts the next word.
        match chars.get(upper_run) {
            Some((_, c)) if c.is_lowercase() => upper_run - 1,
            _ => upper_run,
        }
    } else {
        1 + chars
            .iter()
            .skip(1)
            .take_while(|(_, c)| !c.is_uppercase() && !is_boundary(*c))
            .count()
    };

    chars
        .get(end_char)
        .map_or(name, |(byte_index, _)| &name[..*byte_index])
}

fn assign_by_leading_word(names: &BTreeSet<String>) -> BTreeMap<String, Option<String>> {
    let words: Vec<(&String, &str)> = names.iter().map(|n| (n, leading_word(n))).collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, word) in &words {
        if !word.is_empty() {
            *counts.entry(*word).or_default() += 1;
        }
    }

    words
        .into_iter()
        .map(|(name, word)| {
            let label = (counts.get(word).copied().unwrap_or(0) >= 2).then(|| word.to_owned());
            (name.clone(), label)
        })
        .collect()
}

// ── Assembly ─────────────────────────────────────────────────────────

fn build_grouping(assignments: BTreeMap<String, Option<String>>) -> Grouping {
    let mut labelled: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    let mut others = Vec::new();

    // Assignments iterate in name order, so members come out sorted.
    for (name, label) in &assignments {
        match label {
            Some(label) => labelled.entry(label.as_str()).or_default().push(name.clone()),
            None => others.push(name.clone()),
        }
    }

    let mut groups: Vec<Group> = labelled
        .into_iter()
        .map(|(label, members)| Group {
            label: label.to_owned(),
            members,
            synthetic: false,
        })
        .collect();

    if !others.is_empty() {
        groups.push(Group {
            label: OTHERS_LABEL.to_owned(),
            members: others,
            synthetic: true,
        });
    }

    Grouping {
        assignments,
        groups,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn prefix(names: &[&str]) -> Grouping {
        GroupingEngine::default().group(names)
    }

    fn labels(grouping: &Grouping) -> Vec<&str> {
        grouping.groups.iter().map(|g| g.label.as_str()).collect()
    }

    #[test]
    fn shared_prefix_forms_group_and_rest_go_to_others() {
        let grouping = prefix(&["TVRoomLamp", "Kitchen", "TVRoomFan"]);

        assert_eq!(labels(&grouping), ["TVRoom", "Others"]);
        assert_eq!(grouping.group("TVRoom").unwrap().members, ["TVRoomFan", "TVRoomLamp"]);
        assert_eq!(grouping.others().unwrap().members, ["Kitchen"]);
        assert_eq!(grouping.label_of("TVRoomLamp"), Some("TVRoom"));
        assert_eq!(grouping.label_of("Kitchen"), None);
    }

    #[test]
    fn ties_prefer_the_longest_prefix() {
        let grouping = prefix(&["BedLampA", "BedLampB"]);
        assert_eq!(labels(&grouping), ["BedLamp"]);
    }

    #[test]
    fn highest_count_wins_over_length() {
        let grouping = prefix(&["LivingRoomLamp", "LivingRoomFan", "LivingTV"]);
        assert_eq!(labels(&grouping), ["Living"]);
        assert_eq!(grouping.group("Living").unwrap().members.len(), 3);
    }

    #[test]
    fn full_name_counts_as_a_candidate() {
        let grouping = prefix(&["Kitchen", "KitchenLamp"]);
        assert_eq!(grouping.label_of("Kitchen"), Some("Kitchen"));
        assert_eq!(grouping.label_of("KitchenLamp"), Some("Kitchen"));
    }

    #[test]
    fn short_prefixes_are_ignored() {
        // "TV" is only two chars, so the lamps share nothing usable.
        let grouping = prefix(&["TVLamp", "TVFan"]);
        assert_eq!(labels(&grouping), ["Others"]);
    }

    #[test]
    fn output_is_permutation_and_duplicate_invariant() {
        let a = prefix(&["TVRoomLamp", "TVRoomFan", "Kitchen", "KitchenLamp", "Door"]);
        let b = prefix(&["Door", "KitchenLamp", "TVRoomFan", "Kitchen", "TVRoomLamp", "Door"]);
        assert_eq!(a, b);
    }

    #[test]
    fn groups_are_sorted_with_others_last() {
        let grouping = prefix(&["ZoneOneA", "ZoneOneB", "AtticFan", "AtticLight", "Solo"]);
        assert_eq!(labels(&grouping), ["Attic", "ZoneOne", "Others"]);
    }

    #[test]
    fn empty_input_has_no_groups() {
        let grouping = prefix(&[]);
        assert!(grouping.is_empty());
        assert!(grouping.groups.is_empty());
    }

    #[test]
    fn multibyte_names_are_measured_in_chars() {
        let grouping = prefix(&["ÄöüLamp", "ÄöüFan"]);
        assert_eq!(labels(&grouping), ["Äöü"]);
    }

    #[test]
    fn leading_word_boundaries() {
        assert_eq!(leading_word("TVRoomLamp"), "TV");
        assert_eq!(leading_word("KitchenLamp"), "Kitchen");
        assert_eq!(leading_word("Kitchen"), "Kitchen");
        assert_eq!(leading_word("kitchen_lamp"), "kitchen");
        assert_eq!(leading_word("HVAC"), "HVAC");
        assert_eq!(leading_word("_hidden"), "");
    }

    #[test]
    fn leading_word_strategy_groups_shared_words() {
        let engine = GroupingEngine::new(GroupingStrategy::LeadingWord);
        let grouping = engine.group(["TVRoomLamp", "TVFan", "KitchenLamp", "Kitchen", "Door"]);

        assert_eq!(labels(&grouping), ["Kitchen", "TV", "Others"]);
        assert_eq!(grouping.group("TV").unwrap().members, ["TVFan", "TVRoomLamp"]);
        assert_eq!(grouping.others().unwrap().members, ["Door"]);
    }

    #[test]
    fn strategy_parses_from_kebab_case() {
        assert_eq!(
            "leading-word".parse::<GroupingStrategy>().unwrap(),
            GroupingStrategy::LeadingWord
        );
        assert_eq!(GroupingStrategy::default().to_string(), "prefix-frequency");
    }
}
