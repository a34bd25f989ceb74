use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

/// Identifier into the fixed daily slot table (1..=11).
pub type SlotId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDef {
    pub id: SlotId,
    pub weekday_time: &'static str,
    pub weekend_time: &'static str,
}

/// The 11 daily scheduling intervals. Weekday and weekend wall-clock ranges
/// diverge in the early afternoon (shorter breaks on weekends); the table is
/// reference data, not engine state.
pub const TIME_SLOTS: [SlotDef; 11] = [
    SlotDef { id: 1, weekday_time: "9:00-10:00", weekend_time: "9:00-10:00" },
    SlotDef { id: 2, weekday_time: "10:10-11:10", weekend_time: "10:10-11:10" },
    SlotDef { id: 3, weekday_time: "11:20-12:20", weekend_time: "11:20-12:20" },
    SlotDef { id: 4, weekday_time: "12:30-13:30", weekend_time: "12:30-13:30" },
    SlotDef { id: 5, weekday_time: "14:10-15:10", weekend_time: "13:40-14:40" },
    SlotDef { id: 6, weekday_time: "15:15-16:15", weekend_time: "14:50-15:50" },
    SlotDef { id: 7, weekday_time: "16:20-17:20", weekend_time: "16:00-17:00" },
    SlotDef { id: 8, weekday_time: "17:25-18:25", weekend_time: "17:10-18:10" },
    SlotDef { id: 9, weekday_time: "18:30-19:30", weekend_time: "18:20-19:20" },
    SlotDef { id: 10, weekday_time: "19:35-20:35", weekend_time: "19:30-20:30" },
    SlotDef { id: 11, weekday_time: "20:40-21:40", weekend_time: "20:40-21:40" },
];

pub fn slot_def(id: SlotId) -> Option<&'static SlotDef> {
    TIME_SLOTS.iter().find(|s| s.id == id)
}

/// Takes the raw wire integer so out-of-range values are rejected before any
/// narrowing cast.
pub fn is_valid_slot(id: u64) -> bool {
    (1..=TIME_SLOTS.len() as u64).contains(&id)
}

/// Wall-clock label for a slot on a concrete date.
#[allow(dead_code)]
pub fn slot_time_on(date: NaiveDate, id: SlotId) -> Option<&'static str> {
    let def = slot_def(id)?;
    let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
    Some(if weekend { def.weekend_time } else { def.weekday_time })
}
