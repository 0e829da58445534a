//! Zero-cost answers computed from the caller's metric snapshot.
//!
//! Every rule names the snapshot fields it needs and answers only when all
//! of them are present with the right JSON type. A rule that cannot find
//! its data yields no match; nothing here estimates or defaults a value.

use serde_json::{Map, Value};

use dispatch_core::MetricSnapshot;

/// A rule-computed answer.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalAnswer {
    pub text: String,
    /// Name of the rule that produced the answer.
    pub rule: &'static str,
}

type Rule = fn(&Question, &MetricSnapshot) -> Option<String>;

/// Evaluated in order; the first rule that answers wins.
const RULES: &[(&str, Rule)] = &[
    ("station_reserve_margin", station_reserve_margin),
    ("system_reserve_margin", system_reserve_margin),
    ("peak_demand", peak_demand),
    ("overdue_tasks", overdue_tasks),
    ("open_tasks", open_tasks),
    ("active_projects", active_projects),
];

/// Try every rule against `snapshot`.
pub fn try_local(question: &str, snapshot: Option<&MetricSnapshot>) -> Option<LocalAnswer> {
    let snapshot = snapshot.filter(|s| !s.is_empty())?;
    let question = Question::new(question);
    RULES.iter().find_map(|(name, rule)| {
        rule(&question, snapshot).map(|text| LocalAnswer { text, rule: *name })
    })
}

/// Lower-cased question with punctuation turned into spaces, so phrase
/// checks can match on word boundaries.
struct Question {
    padded: String,
}

impl Question {
    fn new(raw: &str) -> Self {
        let words: Vec<String> = raw
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            padded: format!(" {} ", words.join(" ")),
        }
    }

    fn has(&self, phrase: &str) -> bool {
        self.padded.contains(&format!(" {phrase} "))
    }

    fn has_any(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|p| self.has(p))
    }

    /// Whether `name` appears as a whole-word phrase.
    fn mentions(&self, name: &str) -> bool {
        let name = Question::new(name);
        let phrase = name.padded.trim();
        !phrase.is_empty() && self.has(phrase)
    }

    fn asks_reserve_margin(&self) -> bool {
        self.has_any(&["reserve margin", "reserve margins", "reserve"])
    }

    fn names_a_station(&self) -> bool {
        self.has_any(&["station", "plant", "unit", "substation"])
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}

fn record_number(record: &Map<String, Value>, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn record_text<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn station_margin(record: &Map<String, Value>) -> Option<f64> {
    if let Some(pct) = record_number(record, "reserve_margin_pct") {
        return Some(pct);
    }
    let capacity = record_number(record, "available_capacity_mw")?;
    let demand = record_number(record, "peak_demand_mw").filter(|d| *d > 0.0)?;
    Some((capacity - demand) / demand * 100.0)
}

/// Which station record the question names.
enum NamedStation<'a> {
    None,
    One(&'a Map<String, Value>),
    /// Two or more names match and no single one explains the others.
    Ambiguous,
}

/// Among stations mentioned in the question, the longest name wins when
/// every other match is part of it ("North" inside "North Ridge").
fn named_station<'a>(q: &Question, snapshot: &'a MetricSnapshot) -> NamedStation<'a> {
    let mut matches: Vec<(Question, &Map<String, Value>)> = snapshot
        .records("stations")
        .into_iter()
        .filter_map(|s| {
            let name = record_text(s, "name")?;
            q.mentions(name).then(|| (Question::new(name), s))
        })
        .collect();
    matches.sort_by_key(|(name, _)| std::cmp::Reverse(name.padded.len()));

    let Some(((longest, record), rest)) = matches.split_first() else {
        return NamedStation::None;
    };
    let explained = rest.iter().all(|(name, _)| {
        name.padded.len() < longest.padded.len() && longest.padded.contains(&name.padded)
    });
    if explained {
        NamedStation::One(*record)
    } else {
        NamedStation::Ambiguous
    }
}

fn station_reserve_margin(q: &Question, snapshot: &MetricSnapshot) -> Option<String> {
    if !q.asks_reserve_margin() {
        return None;
    }
    let NamedStation::One(station) = named_station(q, snapshot) else {
        return None;
    };
    let name = record_text(station, "name")?;
    let margin = station_margin(station)?;
    Some(format!(
        "The reserve margin at {name} is {}%.",
        format_number(margin)
    ))
}

fn system_reserve_margin(q: &Question, snapshot: &MetricSnapshot) -> Option<String> {
    // A question about a specific station must not be answered with the
    // system figure.
    if !q.asks_reserve_margin() || q.names_a_station() {
        return None;
    }
    if !matches!(named_station(q, snapshot), NamedStation::None) {
        return None;
    }
    let margin = snapshot.number("system.reserve_margin_pct")?;
    Some(format!(
        "The current system reserve margin is {}%.",
        format_number(margin)
    ))
}

fn peak_demand(q: &Question, snapshot: &MetricSnapshot) -> Option<String> {
    if !q.has_any(&["peak demand", "peak load"]) || q.names_a_station() {
        return None;
    }
    let demand = snapshot.number("system.peak_demand_mw")?;
    Some(format!(
        "System peak demand is {} MW.",
        format_number(demand)
    ))
}

fn overdue_tasks(q: &Question, snapshot: &MetricSnapshot) -> Option<String> {
    if !q.has("overdue") || !q.has_any(&["task", "tasks"]) {
        return None;
    }
    let overdue = snapshot.count("tasks.overdue")?;
    Some(match overdue {
        0 => "There are no overdue tasks.".to_string(),
        1 => "There is 1 overdue task.".to_string(),
        n => format!("There are {n} overdue tasks."),
    })
}

fn open_tasks(q: &Question, snapshot: &MetricSnapshot) -> Option<String> {
    let asks = q.has_any(&["open tasks", "open task", "how many tasks", "outstanding tasks"]);
    if !asks || q.has("overdue") {
        return None;
    }
    let open = snapshot.count("tasks.open")?;
    Some(match open {
        1 => "There is 1 open task.".to_string(),
        n => format!("There are {n} open tasks."),
    })
}

fn active_projects(q: &Question, snapshot: &MetricSnapshot) -> Option<String> {
    if !q.has_any(&["active projects", "how many projects", "projects active"]) {
        return None;
    }
    let active = snapshot.count("projects.active")?;
    Some(match active {
        1 => "There is 1 active project.".to_string(),
        n => format!("There are {n} active projects."),
    })
}
