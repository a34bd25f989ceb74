use chrono::NaiveDate;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::grade::Grade;
use super::slots::SlotId;

/// One grid column+row: a calendar date and a daily slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub date: NaiveDate,
    pub slot: SlotId,
}

impl CellKey {
    pub fn new(date: NaiveDate, slot: SlotId) -> Self {
        CellKey { date, slot }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.date.format("%Y-%m-%d"), self.slot)
    }
}

impl FromStr for CellKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "YYYY-MM-DD-<slot>": the date prefix is fixed-width.
        if s.len() < 12 {
            return Err(format!("bad cell key: {}", s));
        }
        let date = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d")
            .map_err(|e| format!("bad cell key date: {}", e))?;
        let slot: SlotId = s[11..]
            .parse()
            .map_err(|_| format!("bad cell key slot: {}", s))?;
        Ok(CellKey { date, slot })
    }
}

impl Serialize for CellKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// One availability fact: teacher is willing to teach at (date, slot).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShiftKey {
    pub date: NaiveDate,
    pub teacher_id: String,
    pub slot: SlotId,
}

impl fmt::Display for ShiftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.date.format("%Y-%m-%d"),
            self.teacher_id,
            self.slot
        )
    }
}

impl FromStr for ShiftKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Teacher ids contain hyphens, so anchor the date on the left and the
        // slot on the right.
        if s.len() < 14 {
            return Err(format!("bad shift key: {}", s));
        }
        let date = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d")
            .map_err(|e| format!("bad shift key date: {}", e))?;
        let rest = &s[11..];
        let dash = rest
            .rfind('-')
            .ok_or_else(|| format!("bad shift key: {}", s))?;
        let slot: SlotId = rest[dash + 1..]
            .parse()
            .map_err(|_| format!("bad shift key slot: {}", s))?;
        Ok(ShiftKey {
            date,
            teacher_id: rest[..dash].to_string(),
            slot,
        })
    }
}

impl Serialize for ShiftKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ShiftKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonStatus {
    Normal,
    Locked,
}

impl LessonStatus {
    pub fn code(self) -> &'static str {
        match self {
            LessonStatus::Normal => "normal",
            LessonStatus::Locked => "locked",
        }
    }
}

impl FromStr for LessonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(LessonStatus::Normal),
            "locked" => Ok(LessonStatus::Locked),
            other => Err(format!("unknown lesson status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodInfo {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherInfo {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub subject_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub grade: Grade,
}

/// A placed lesson as the grid sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonInfo {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub status: LessonStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracted_lesson_id: Option<String>,
}

/// All lessons one teacher holds in one cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentGroup {
    pub teacher_id: String,
    pub teacher_name: String,
    pub lessons: Vec<LessonInfo>,
}

/// Remaining regular quota for one (student, subject), already netted against
/// placed lessons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegularPoolEntry {
    pub student_id: String,
    pub student_name: String,
    pub student_grade: Grade,
    pub subject_id: String,
    pub subject_name: String,
    pub count: u32,
}

/// One unplaced special-period unit; carries its own identity so partial
/// fulfillment is tracked independently of the regular pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractedUnit {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub student_grade: Grade,
    pub subject_id: String,
    pub subject_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialPeriodPool {
    pub id: String,
    pub name: String,
    pub units: Vec<ContractedUnit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignedPool {
    pub regular: Vec<RegularPoolEntry>,
    pub special: Vec<SpecialPeriodPool>,
}

/// The last-fetched planner state. Replaced wholesale on every reconciliation;
/// the only in-place mutation is the ToggleLock status patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerSnapshot {
    pub period: PeriodInfo,
    pub teachers: Vec<TeacherInfo>,
    pub sorted_students: Vec<StudentInfo>,
    pub shifts: BTreeSet<ShiftKey>,
    pub assignments: BTreeMap<CellKey, Vec<AssignmentGroup>>,
    pub unassigned: UnassignedPool,
}

impl PlannerSnapshot {
    pub fn has_shift(&self, date: NaiveDate, teacher_id: &str, slot: SlotId) -> bool {
        self.shifts.contains(&ShiftKey {
            date,
            teacher_id: teacher_id.to_string(),
            slot,
        })
    }

    pub fn groups_at(&self, cell: CellKey) -> &[AssignmentGroup] {
        self.assignments.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn group_for(&self, cell: CellKey, teacher_id: &str) -> Option<&AssignmentGroup> {
        self.groups_at(cell).iter().find(|g| g.teacher_id == teacher_id)
    }

    pub fn find_lesson(&self, lesson_id: &str) -> Option<(CellKey, &AssignmentGroup, &LessonInfo)> {
        for (cell, groups) in &self.assignments {
            for group in groups {
                if let Some(lesson) = group.lessons.iter().find(|l| l.id == lesson_id) {
                    return Some((*cell, group, lesson));
                }
            }
        }
        None
    }

    /// The narrow optimistic patch applied after a confirmed ToggleLock.
    pub fn set_lesson_status(&mut self, lesson_id: &str, status: LessonStatus) -> bool {
        for groups in self.assignments.values_mut() {
            for group in groups {
                for lesson in &mut group.lessons {
                    if lesson.id == lesson_id {
                        lesson.status = status;
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn regular_remaining(&self, student_id: &str, subject_id: &str) -> u32 {
        self.unassigned
            .regular
            .iter()
            .find(|e| e.student_id == student_id && e.subject_id == subject_id)
            .map(|e| e.count)
            .unwrap_or(0)
    }

    pub fn contracted_unit(&self, unit_id: &str) -> Option<&ContractedUnit> {
        self.unassigned
            .special
            .iter()
            .flat_map(|p| p.units.iter())
            .find(|u| u.id == unit_id)
    }

    /// Every grid cell of the period, in row-major date/slot order.
    pub fn cells(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.period
            .start_date
            .iter_days()
            .take_while(move |d| *d <= self.period.end_date)
            .flat_map(|date| (1..=11u8).map(move |slot| CellKey::new(date, slot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_key_string_round_trip() {
        let key = CellKey::new(NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(), 11);
        assert_eq!(key.to_string(), "2026-03-04-11");
        assert_eq!(key.to_string().parse::<CellKey>().unwrap(), key);
        assert!("2026-03-04".parse::<CellKey>().is_err());
    }

    #[test]
    fn shift_key_survives_hyphenated_teacher_ids() {
        let key = ShiftKey {
            date: NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(),
            teacher_id: "9f8b2c1a-0000-4a4a-bbbb-123456789abc".to_string(),
            slot: 7,
        };
        let parsed: ShiftKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }
}
