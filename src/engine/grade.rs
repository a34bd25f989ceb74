use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// School grade of a student: elementary 1-6, middle 1-3, high 1-3, plus the
/// repeat-year ("ronin") bucket which is scheduled alongside high school.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "e1")]
    E1,
    #[serde(rename = "e2")]
    E2,
    #[serde(rename = "e3")]
    E3,
    #[serde(rename = "e4")]
    E4,
    #[serde(rename = "e5")]
    E5,
    #[serde(rename = "e6")]
    E6,
    #[serde(rename = "m1")]
    M1,
    #[serde(rename = "m2")]
    M2,
    #[serde(rename = "m3")]
    M3,
    #[serde(rename = "h1")]
    H1,
    #[serde(rename = "h2")]
    H2,
    #[serde(rename = "h3")]
    H3,
    #[serde(rename = "ronin")]
    Ronin,
}

/// Level category used to decide which subjects a grade may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Elementary,
    Middle,
    High,
}

impl Grade {
    pub const ALL: [Grade; 13] = [
        Grade::E1,
        Grade::E2,
        Grade::E3,
        Grade::E4,
        Grade::E5,
        Grade::E6,
        Grade::M1,
        Grade::M2,
        Grade::M3,
        Grade::H1,
        Grade::H2,
        Grade::H3,
        Grade::Ronin,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Grade::E1 => "e1",
            Grade::E2 => "e2",
            Grade::E3 => "e3",
            Grade::E4 => "e4",
            Grade::E5 => "e5",
            Grade::E6 => "e6",
            Grade::M1 => "m1",
            Grade::M2 => "m2",
            Grade::M3 => "m3",
            Grade::H1 => "h1",
            Grade::H2 => "h2",
            Grade::H3 => "h3",
            Grade::Ronin => "ronin",
        }
    }

    pub fn level(self) -> Level {
        match self {
            Grade::E1 | Grade::E2 | Grade::E3 | Grade::E4 | Grade::E5 | Grade::E6 => {
                Level::Elementary
            }
            Grade::M1 | Grade::M2 | Grade::M3 => Level::Middle,
            // Ronin students request high-school subjects.
            Grade::H1 | Grade::H2 | Grade::H3 | Grade::Ronin => Level::High,
        }
    }

    /// Display rank for student lists: exam-year middle schoolers first, then
    /// ronin and high school descending, elementary last. This is the house
    /// ordering, not a plain grade progression.
    pub fn sort_rank(self) -> usize {
        const ORDER: [Grade; 13] = [
            Grade::M3,
            Grade::M2,
            Grade::M1,
            Grade::Ronin,
            Grade::H3,
            Grade::H2,
            Grade::H1,
            Grade::E6,
            Grade::E5,
            Grade::E4,
            Grade::E3,
            Grade::E2,
            Grade::E1,
        ];
        ORDER.iter().position(|g| *g == self).unwrap_or(ORDER.len())
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Grade::ALL
            .iter()
            .copied()
            .find(|g| g.code() == s)
            .ok_or_else(|| format!("unknown grade: {}", s))
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elementary" => Ok(Level::Elementary),
            "middle" => Ok(Level::Middle),
            "high" => Ok(Level::High),
            other => Err(format!("unknown level: {}", other)),
        }
    }
}

/// Pool-list filter over student grades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeFilter {
    All,
    /// Any elementary grade, as one bucket.
    Elementary,
    Exact(Grade),
}

impl GradeFilter {
    pub fn matches(self, grade: Grade) -> bool {
        match self {
            GradeFilter::All => true,
            GradeFilter::Elementary => grade.level() == Level::Elementary,
            GradeFilter::Exact(g) => g == grade,
        }
    }

    pub fn code(self) -> String {
        match self {
            GradeFilter::All => "all".to_string(),
            GradeFilter::Elementary => "elementary".to_string(),
            GradeFilter::Exact(g) => g.code().to_string(),
        }
    }
}

impl FromStr for GradeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(GradeFilter::All),
            "elementary" => Ok(GradeFilter::Elementary),
            other => other.parse::<Grade>().map(GradeFilter::Exact),
        }
    }
}
