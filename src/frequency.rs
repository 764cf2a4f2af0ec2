use std::collections::BTreeSet;

use tracing::warn;

const FREQUENCY_TABLES: &[(&str, &[&str])] = &[
    ("day", &["day", "cfDay", "dayExtras"]),
    (
        "mon",
        &[
            "Omon",
            "OmonExtras",
            "Amon",
            "AmonExtras",
            "Lmon",
            "LmonExtras",
            "OImon",
            "LImon",
            "cfMon",
            "aero",
            "cfOff",
        ],
    ),
    ("3hr", &["3hr", "3hrLev", "cf3hr", "cfSites"]),
    ("6hr", &["6hr", "6hrPlev", "6hrLev"]),
    ("monClim", &["Oclim", "Lclim", "Aclim", "LIclim"]),
    ("yr", &["Oyr", "OyrExtras"]),
    ("fx", &["fx"]),
    ("subhr", &["cfSites"]),
];

/// MIP tables holding data at the given frequency. Unknown labels expand to nothing.
pub fn expand_frequency(label: &str) -> BTreeSet<String> {
    FREQUENCY_TABLES
        .iter()
        .find(|(known, _)| *known == label.trim())
        .map(|(_, tables)| tables.iter().map(|table| table.to_string()).collect())
        .unwrap_or_default()
}

/// Union of the expansions of every label.
pub fn expand_all<I, S>(labels: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tables = BTreeSet::new();
    for label in labels {
        let expanded = expand_frequency(label.as_ref());
        if expanded.is_empty() {
            warn!(frequency = label.as_ref(), "unknown frequency ignored");
        }
        tables.extend(expanded);
    }
    tables
}
