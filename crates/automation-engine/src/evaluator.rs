//! Trigger evaluation
//!
//! Pure functions over snapshots, local time and cached weather. The only
//! state involved is [`SunEdgeState`], owned by the rule engine.

use crate::model::{Rule, TriggerFamily, TriggerKind};
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use hub_core::{InputSnapshot, WeatherSnapshot};
use std::collections::HashMap;

/// Everything a trigger can look at during one evaluation pass
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub previous: &'a InputSnapshot,
    pub current: &'a InputSnapshot,
    pub now: DateTime<Tz>,
    pub weather: &'a WeatherSnapshot,
}

/// Last-known sun flag per `(rule id, trigger)`, used to fire on the
/// false-to-true transition only. Lives for the process lifetime.
#[derive(Debug, Default)]
pub struct SunEdgeState {
    flags: HashMap<(String, TriggerKind), bool>,
}

impl SunEdgeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `flag` and report whether it is a rising edge.
    /// An unseen key counts as previously false.
    pub fn observe(&mut self, rule_id: &str, trigger: TriggerKind, flag: bool) -> bool {
        let previous = self
            .flags
            .insert((rule_id.to_string(), trigger), flag)
            .unwrap_or(false);
        !previous && flag
    }
}

/// Parse `HH:MM` (24-hour). Single-digit fields are accepted.
pub fn parse_hm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h < 24 && m < 60 {
        Some((h, m))
    } else {
        None
    }
}

/// Inclusive window test; `start > end` wraps past midnight
pub fn in_time_window(start: (u32, u32), end: (u32, u32), now: (u32, u32)) -> bool {
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

/// `days` uses 0=Monday .. 6=Sunday. Absent or empty means every day.
pub fn weekday_matches(days: Option<&[u8]>, now: &DateTime<Tz>) -> bool {
    match days {
        Some(days) if !days.is_empty() => {
            let today = now.weekday().num_days_from_monday();
            days.iter().any(|d| u32::from(*d) == today)
        }
        _ => true,
    }
}

/// Digital edge triggers
pub fn digital_edge(trigger: TriggerKind, prev: bool, curr: bool) -> Option<String> {
    match trigger {
        TriggerKind::OnChange if prev != curr => Some(format!("change {prev}->{curr}")),
        TriggerKind::OnRising if !prev && curr => Some("rising".to_string()),
        TriggerKind::OnFalling if prev && !curr => Some("falling".to_string()),
        _ => None,
    }
}

/// `prev <= thr < curr` going up, `prev >= thr > curr` going down.
/// A missing reading never crosses.
pub fn crosses(prev: Option<f64>, curr: Option<f64>, threshold: f64, upward: bool) -> bool {
    match (prev, curr) {
        (Some(p), Some(c)) if upward => p <= threshold && threshold < c,
        (Some(p), Some(c)) => p >= threshold && threshold > c,
        _ => false,
    }
}

/// Analog level (`above`/`below`, strict) and cross triggers
pub fn analog_condition(
    trigger: TriggerKind,
    prev: Option<f64>,
    curr: Option<f64>,
    threshold: f64,
) -> Option<String> {
    let fired = match trigger {
        TriggerKind::Above => curr.is_some_and(|c| c > threshold),
        TriggerKind::Below => curr.is_some_and(|c| c < threshold),
        TriggerKind::CrossUp => crosses(prev, curr, threshold, true),
        TriggerKind::CrossDown => crosses(prev, curr, threshold, false),
        _ => false,
    };
    fired.then(|| format!("{trigger} {threshold}"))
}

/// Sun flag for this instant, `None` when the reference time is unknown
pub fn sun_flag(
    trigger: TriggerKind,
    now: DateTime<Utc>,
    sunrise: Option<DateTime<Utc>>,
    sunset: Option<DateTime<Utc>>,
) -> Option<bool> {
    match trigger {
        TriggerKind::AfterSunrise => sunrise.map(|t| now >= t),
        TriggerKind::BeforeSunrise => sunrise.map(|t| now <= t),
        TriggerKind::AfterSunset => sunset.map(|t| now >= t),
        TriggerKind::BeforeSunset => sunset.map(|t| now <= t),
        _ => None,
    }
}

/// Outside temperature level triggers (strict comparison)
pub fn temperature_condition(trigger: TriggerKind, temp: f64, threshold: f64) -> Option<String> {
    let fired = match trigger {
        TriggerKind::TempAbove => temp > threshold,
        TriggerKind::TempBelow => temp < threshold,
        _ => false,
    };
    fired.then(|| format!("{trigger} {threshold}"))
}

/// Decide whether `rule` fires in this pass, returning the reason.
/// Sun triggers update `sun_edges` whenever their reference time is known.
pub fn evaluate_trigger(
    rule: &Rule,
    ctx: &TriggerContext<'_>,
    sun_edges: &mut SunEdgeState,
) -> Option<String> {
    let trigger = rule.trigger;
    match trigger.family() {
        TriggerFamily::Digital => digital_edge(
            trigger,
            ctx.previous.digital_at(rule.index),
            ctx.current.digital_at(rule.index),
        ),
        TriggerFamily::Analog => analog_condition(
            trigger,
            ctx.previous.analog_at(rule.index),
            ctx.current.analog_at(rule.index),
            rule.threshold?,
        ),
        TriggerFamily::Time => {
            let start = parse_hm(rule.start.as_deref()?)?;
            let end = parse_hm(rule.end.as_deref()?)?;
            let now = (ctx.now.hour(), ctx.now.minute());
            in_time_window(start, end, now).then(|| {
                format!(
                    "time_between {}-{}",
                    rule.start.as_deref().unwrap_or_default(),
                    rule.end.as_deref().unwrap_or_default()
                )
            })
        }
        TriggerFamily::Sun => {
            let flag = sun_flag(
                trigger,
                ctx.now.with_timezone(&Utc),
                ctx.weather.sunrise,
                ctx.weather.sunset,
            )?;
            sun_edges
                .observe(&rule.id, trigger, flag)
                .then(|| trigger.to_string())
        }
        TriggerFamily::Temperature => {
            temperature_condition(trigger, ctx.weather.temp?, rule.threshold?)
        }
    }
}
