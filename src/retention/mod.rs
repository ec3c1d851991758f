use crate::snapshot::Snapshot;
use chrono::{DateTime, Duration, Utc};

mod eval;
mod parser;

#[cfg(test)]
mod tests;

/// Calendar bucket unit used by `PerInterval` rules and by the tier-age
/// unit suffixes (`h`, `d`, `w`, `m`, `y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Interval {
    /// Approximate fixed duration used only to place a rule on the age
    /// axis (tier assignment); calendar bucketing inside a tier uses true
    /// calendar arithmetic instead (see `eval::bucket_key`).
    fn approx_duration(self) -> Duration {
        match self {
            Interval::Hour => Duration::hours(1),
            Interval::Day => Duration::days(1),
            Interval::Week => Duration::days(7),
            Interval::Month => Duration::days(30),
            Interval::Year => Duration::days(365),
        }
    }

    fn letter(self) -> char {
        match self {
            Interval::Hour => 'h',
            Interval::Day => 'd',
            Interval::Week => 'w',
            Interval::Month => 'm',
            Interval::Year => 'y',
        }
    }
}

/// What to do with the snapshots assigned to one age tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    All,
    None,
    /// Keep `n` most recent snapshots per calendar bucket of `interval`,
    /// where consecutive buckets are grouped into runs of `multiplier`
    /// (so `1/4m` is `multiplier = 4`, `interval = Month`).
    PerInterval {
        n: u32,
        interval: Interval,
        multiplier: u32,
    },
    /// The degenerate integer-shorthand form: keep the `n` most recent
    /// snapshots overall, drop the rest. Only ever appears as the sole
    /// rule of an expression parsed from a bare integer.
    MostRecent(u32),
}

/// One age-tier rule: applies to every snapshot whose age has crossed
/// `age` but not the next rule's age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub age: Duration,
    pub keep: Keep,
}

/// A parsed, canonicalised retention expression: rules sorted ascending by
/// `age`, with an implicit `age = 0 : All` rule prepended if the first
/// explicit rule doesn't already start at age zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionExpr {
    pub rules: Vec<Rule>,
}

impl RetentionExpr {
    /// Parse and canonicalise a retention expression string (spec §4.5).
    pub fn parse(input: &str) -> crate::error::Result<RetentionExpr> {
        parser::parse(input)
    }

    /// Render back to the canonical textual form; `parse(expr.render())`
    /// reproduces an equal AST (spec §8 parse round-trip property).
    pub fn render(&self) -> String {
        if let [Rule {
            age,
            keep: Keep::MostRecent(n),
        }] = self.rules.as_slice()
        {
            if age.num_seconds() == 0 {
                return n.to_string();
            }
        }

        self.rules
            .iter()
            .filter(|r| !(r.age.num_seconds() == 0 && r.keep == Keep::All && self.rules.len() > 1))
            .map(render_rule)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Evaluate this policy over `snapshots` (any order) at reference time
    /// `now`, returning the set to keep (spec §4.5 steps 1-4).
    pub fn keep(&self, snapshots: &[Snapshot], now: DateTime<Utc>) -> Vec<Snapshot> {
        eval::evaluate(self, snapshots, now)
    }
}

fn render_rule(rule: &Rule) -> String {
    let (count, unit) = age_count_and_unit(rule.age);
    let age = format!("{}{}", count, unit);
    let keep = match rule.keep {
        Keep::All => "all".to_string(),
        Keep::None => "none".to_string(),
        Keep::PerInterval {
            n,
            interval,
            multiplier,
        } => {
            if multiplier == 1 {
                format!("{}/{}", n, interval.letter())
            } else {
                format!("{}/{}{}", n, multiplier, interval.letter())
            }
        }
        Keep::MostRecent(n) => format!("{}/", n),
    };
    format!("{}:{}", age, keep)
}

/// Pick a count/unit pair for a tier's age that reproduces its exact
/// duration on reparse, independently of the rule's keep interval (the age
/// axis and the keep interval are unrelated — see `parse_duration`, which
/// only ever reads the unit from the age side of the rule). Tries the
/// coarsest unit that divides the duration evenly, falling back to hours,
/// which always divides it exactly since every unit's approximate duration
/// is itself a whole number of hours.
fn age_count_and_unit(d: Duration) -> (i64, char) {
    let secs = d.num_seconds().max(0);
    const UNITS: [(char, i64); 4] = [('y', 365 * 86_400), ('m', 30 * 86_400), ('w', 604_800), ('d', 86_400)];
    for (letter, per) in UNITS {
        if secs != 0 && secs % per == 0 {
            return (secs / per, letter);
        }
    }
    (secs / 3600, 'h')
}
