use super::{Interval, Keep, Rule, RetentionExpr};
use crate::error::{Result, SxError};
use chrono::Duration;

fn err(token: &str, position: usize, message: impl Into<String>) -> SxError {
    SxError::RetentionParse {
        message: message.into(),
        token: token.to_string(),
        position,
    }
}

/// Parse a retention expression (spec §4.5 grammar) into its canonical AST.
pub fn parse(input: &str) -> Result<RetentionExpr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(err(input, 0, "empty retention expression"));
    }

    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let n: u32 = trimmed
            .parse()
            .map_err(|_| err(trimmed, 0, "integer shorthand out of range"))?;
        if n == 0 {
            return Err(err(trimmed, 0, "integer shorthand must be at least 1"));
        }
        return canonicalize(vec![Rule {
            age: Duration::zero(),
            keep: Keep::MostRecent(n),
        }]);
    }

    let mut rules = Vec::new();
    let mut position = 0usize;
    for part in trimmed.split(',') {
        let token = part.trim();
        if token.is_empty() {
            return Err(err(part, position, "empty rule"));
        }
        rules.push(parse_rule(token, position)?);
        position += part.len() + 1;
    }

    canonicalize(rules)
}

fn parse_rule(token: &str, position: usize) -> Result<Rule> {
    let (duration_str, keep_str) = token
        .split_once(':')
        .ok_or_else(|| err(token, position, "rule must be of the form \"duration:keep\""))?;

    let age = parse_duration(duration_str.trim(), token, position)?;
    let keep = parse_keep(keep_str.trim(), token, position)?;
    Ok(Rule { age, keep })
}

fn unit_to_interval(unit: char, token: &str, position: usize) -> Result<Interval> {
    match unit.to_ascii_lowercase() {
        'h' => Ok(Interval::Hour),
        'd' => Ok(Interval::Day),
        'w' => Ok(Interval::Week),
        'm' => Ok(Interval::Month),
        'y' => Ok(Interval::Year),
        other => Err(err(
            token,
            position,
            format!("unknown interval unit \"{}\"", other),
        )),
    }
}

fn parse_duration(s: &str, token: &str, position: usize) -> Result<Duration> {
    if s.len() < 2 {
        return Err(err(token, position, "malformed duration"));
    }
    let unit_char = s
        .chars()
        .last()
        .ok_or_else(|| err(token, position, "malformed duration"))?;
    let digits = &s[..s.len() - unit_char.len_utf8()];
    let count: i64 = digits
        .parse()
        .map_err(|_| err(token, position, format!("invalid duration count \"{}\"", digits)))?;
    let interval = unit_to_interval(unit_char, token, position)?;
    Ok(Duration::seconds(interval.approx_duration().num_seconds() * count))
}

fn parse_keep(s: &str, token: &str, position: usize) -> Result<Keep> {
    let lower = s.to_ascii_lowercase();
    match lower.as_str() {
        "all" => return Ok(Keep::All),
        "none" => return Ok(Keep::None),
        "hourly" => {
            return Ok(Keep::PerInterval {
                n: 1,
                interval: Interval::Hour,
                multiplier: 1,
            })
        }
        "daily" => {
            return Ok(Keep::PerInterval {
                n: 1,
                interval: Interval::Day,
                multiplier: 1,
            })
        }
        "weekly" => {
            return Ok(Keep::PerInterval {
                n: 1,
                interval: Interval::Week,
                multiplier: 1,
            })
        }
        "monthly" => {
            return Ok(Keep::PerInterval {
                n: 1,
                interval: Interval::Month,
                multiplier: 1,
            })
        }
        "yearly" => {
            return Ok(Keep::PerInterval {
                n: 1,
                interval: Interval::Year,
                multiplier: 1,
            })
        }
        _ => {}
    }

    if let Some((n_str, rest)) = lower.split_once('/') {
        let n: u32 = n_str
            .parse()
            .map_err(|_| err(token, position, format!("invalid keep count \"{}\"", n_str)))?;
        if n == 0 {
            return Err(err(token, position, "keep count must be at least 1"));
        }
        let (multiplier, unit) = split_multiplier_unit(rest, token, position)?;
        let interval = unit_to_interval(unit, token, position)?;
        return Ok(Keep::PerInterval {
            n,
            interval,
            multiplier,
        });
    }

    // Bare unit shorthand: "d" standing for "1/d".
    if lower.len() == 1 {
        let interval = unit_to_interval(lower.chars().next().unwrap(), token, position)?;
        return Ok(Keep::PerInterval {
            n: 1,
            interval,
            multiplier: 1,
        });
    }

    Err(err(token, position, format!("unrecognised keep spec \"{}\"", s)))
}

fn split_multiplier_unit(rest: &str, token: &str, position: usize) -> Result<(u32, char)> {
    if rest.is_empty() {
        return Err(err(token, position, "missing interval unit"));
    }
    let unit = rest.chars().last().unwrap();
    let digits = &rest[..rest.len() - unit.len_utf8()];
    let multiplier: u32 = if digits.is_empty() {
        1
    } else {
        digits
            .parse()
            .map_err(|_| err(token, position, format!("invalid multiplier \"{}\"", digits)))?
    };
    if multiplier == 0 {
        return Err(err(token, position, "multiplier must be at least 1"));
    }
    Ok((multiplier, unit))
}

/// Sort rules ascending by age, reject duplicate ages, and prepend the
/// implicit `age = 0 : All` rule when the first explicit rule starts above
/// age zero — snapshots newer than any stated tier are kept in full until
/// they cross into it.
fn canonicalize(mut rules: Vec<Rule>) -> Result<RetentionExpr> {
    rules.sort_by_key(|r| r.age);

    for pair in rules.windows(2) {
        if pair[0].age == pair[1].age {
            return Err(SxError::RetentionParse {
                message: "duplicate age tier".to_string(),
                token: format!("{:?}", pair[0].age),
                position: 0,
            });
        }
    }

    let is_degenerate = matches!(
        rules.as_slice(),
        [Rule {
            keep: Keep::MostRecent(_),
            ..
        }]
    );

    if !is_degenerate {
        if let Some(first) = rules.first() {
            if first.age != Duration::zero() {
                rules.insert(
                    0,
                    Rule {
                        age: Duration::zero(),
                        keep: Keep::All,
                    },
                );
            }
        }
    }

    Ok(RetentionExpr { rules })
}
