use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        str_enum!($name as "snake_case" { $($variant => $s),+ });
    };
    ($name:ident as $case:literal { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = $case)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(ReportType {
    Radiology => "radiology",
    Pathology => "pathology",
    Laboratory => "laboratory",
    Audiology => "audiology",
    Oncology => "oncology",
    ClinicalNote => "clinical_note",
    Discharge => "discharge",
    Other => "other",
});

impl ReportType {
    /// Map a free-form report label ("CT Scan", "Audiogram", "Lab Results")
    /// onto a known type. Unrecognised labels become `Other`.
    pub fn from_label(label: &str) -> Self {
        if let Ok(exact) = label.trim().parse::<Self>() {
            return exact;
        }
        let lower = label.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["radiol", "ct ", "ct scan", "mri", "x-ray", "xray", "ultrasound", "imaging", "pet"]) {
            Self::Radiology
        } else if has(&["patholog", "biopsy", "histolog", "cytolog"]) {
            Self::Pathology
        } else if has(&["audio", "hearing", "speech", "tympan"]) {
            Self::Audiology
        } else if has(&["oncolog", "chemo", "tumor board", "tumour board"]) {
            Self::Oncology
        } else if has(&["lab", "blood", "panel", "cbc"]) {
            Self::Laboratory
        } else if has(&["discharge"]) {
            Self::Discharge
        } else if has(&["note", "consult", "progress", "visit"]) {
            Self::ClinicalNote
        } else {
            Self::Other
        }
    }
}

str_enum!(Specialty {
    Oncology => "oncology",
    Speech => "speech",
    General => "general",
});

str_enum!(SummarySection {
    Evolution => "evolution",
    CurrentStatus => "current_status",
    Plan => "plan",
    Oncology => "oncology",
    Speech => "speech",
});

impl SummarySection {
    pub const UNIVERSAL: [SummarySection; 3] = [
        SummarySection::Evolution,
        SummarySection::CurrentStatus,
        SummarySection::Plan,
    ];

    /// The section a populated specialty block is cited under.
    pub fn for_specialty(specialty: Specialty) -> Option<Self> {
        match specialty {
            Specialty::Oncology => Some(Self::Oncology),
            Specialty::Speech => Some(Self::Speech),
            Specialty::General => None,
        }
    }
}

// Why a piece of context was put in front of the model.
str_enum!(Provenance {
    Structural => "structural",
    Keyword => "keyword",
    Vector => "vector",
    Continuity => "continuity",
});

str_enum!(TrendStatus as "SCREAMING_SNAKE_CASE" {
    Improving => "IMPROVING",
    Worsening => "WORSENING",
    Stable => "STABLE",
});
