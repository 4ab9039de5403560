//! Single cron-field parsing: `*`, `a`, `a-b`, `a,b,c`, `*/n`, `a/n`.

use std::collections::BTreeSet;

use crate::error::EngineError;

/// Parse one cron field into the sorted set of values it matches, bounded
/// to `[min, max]` inclusive.
pub fn parse_field(raw: &str, min: u32, max: u32, field_name: &str) -> Result<BTreeSet<u32>, EngineError> {
    let mut values = BTreeSet::new();
    for part in raw.split(',') {
        parse_part(part, min, max, field_name, &mut values)?;
    }
    if values.is_empty() {
        return Err(EngineError::invalid_input(format!(
            "cron field {field_name}: no values parsed from {raw:?}"
        )));
    }
    Ok(values)
}

fn parse_part(
    part: &str,
    min: u32,
    max: u32,
    field_name: &str,
    out: &mut BTreeSet<u32>,
) -> Result<(), EngineError> {
    let part = part.trim();
    if part.is_empty() {
        return Err(EngineError::invalid_input(format!(
            "cron field {field_name}: empty component"
        )));
    }

    if let Some((base, step_raw)) = part.split_once('/') {
        let step: u32 = step_raw
            .parse()
            .map_err(|_| invalid(field_name, part))?;
        if step == 0 {
            return Err(invalid(field_name, part));
        }
        let (lo, hi) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            (parse_bound(a, field_name, part)?, parse_bound(b, field_name, part)?)
        } else {
            (parse_bound(base, field_name, part)?, max)
        };
        check_range(lo, min, max, field_name, part)?;
        check_range(hi, min, max, field_name, part)?;
        let mut v = lo;
        while v <= hi {
            out.insert(v);
            v += step;
        }
        return Ok(());
    }

    if part == "*" {
        for v in min..=max {
            out.insert(v);
        }
        return Ok(());
    }

    if let Some((a, b)) = part.split_once('-') {
        let lo = parse_bound(a, field_name, part)?;
        let hi = parse_bound(b, field_name, part)?;
        check_range(lo, min, max, field_name, part)?;
        check_range(hi, min, max, field_name, part)?;
        if lo > hi {
            return Err(invalid(field_name, part));
        }
        for v in lo..=hi {
            out.insert(v);
        }
        return Ok(());
    }

    let v = parse_bound(part, field_name, part)?;
    check_range(v, min, max, field_name, part)?;
    out.insert(v);
    Ok(())
}

fn parse_bound(raw: &str, field_name: &str, part: &str) -> Result<u32, EngineError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(field_name, part))
}

fn check_range(v: u32, min: u32, max: u32, field_name: &str, part: &str) -> Result<(), EngineError> {
    if v < min || v > max {
        return Err(invalid(field_name, part));
    }
    Ok(())
}

fn invalid(field_name: &str, part: &str) -> EngineError {
    EngineError::invalid_input(format!("cron field {field_name}: invalid component {part:?}"))
}
