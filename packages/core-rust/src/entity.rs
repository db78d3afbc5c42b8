//! Logical tables and the records they hold.
//!
//! Each logical table is served by one or more partitions. Records are plain
//! data; which partition owns a record is decided by the
//! [`PartitionLayout`](crate::partition::PartitionLayout), never by the record
//! itself. Student and stage-2/3 rows do not store their department: it is
//! implied by the partition holding them.

use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::filter::FieldValue;

/// Name of the fragmentation key attribute used in filters.
pub const DEPARTMENT_FIELD: &str = "department";

// ---------------------------------------------------------------------------
// LogicalTable
// ---------------------------------------------------------------------------

/// The logical tables exposed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalTable {
    Class,
    Student,
    ScoreStage1,
    ScoreStage23,
}

impl LogicalTable {
    pub const ALL: [LogicalTable; 4] = [
        Self::Class,
        Self::Student,
        Self::ScoreStage1,
        Self::ScoreStage23,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Student => "student",
            Self::ScoreStage1 => "score_stage1",
            Self::ScoreStage23 => "score_stage23",
        }
    }
}

impl fmt::Display for LogicalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Department
// ---------------------------------------------------------------------------

/// A fragmentation key value (department code such as `K1`).
///
/// Always upper-case ASCII alphanumeric and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Department(pub(crate) String);

impl Department {
    /// Normalises and validates a raw department code.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if the code is empty or contains anything
    /// other than ASCII letters and digits.
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let code = raw.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(GatewayError::validation("department code is empty"));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(GatewayError::validation(format!(
                "department code '{raw}' must be alphanumeric"
            )));
        }
        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Department {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Department> for String {
    fn from(value: Department) -> Self {
        value.0
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub class_id: String,
    pub name: String,
    pub department: Department,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: String,
    pub full_name: String,
    #[serde(default)]
    pub gender: Option<String>,
    /// ISO-8601 calendar date.
    #[serde(default)]
    pub birth_date: Option<String>,
    pub class_id: String,
    #[serde(default)]
    pub scholarship: Option<f64>,
}

/// Composite key of a score record: one student taking one subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScoreKey {
    pub student_id: String,
    pub subject_id: String,
}

impl ScoreKey {
    #[must_use]
    pub fn new(student_id: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            subject_id: subject_id.into(),
        }
    }
}

impl fmt::Display for ScoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.student_id, self.subject_id)
    }
}

/// Stage-1 score columns, kept for every department in one shared partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage1Score {
    pub student_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub score1: Option<f64>,
}

/// Stage-2 and stage-3 score columns, kept in the student's department partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage23Score {
    pub student_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub score2: Option<f64>,
    #[serde(default)]
    pub score3: Option<f64>,
}

// ---------------------------------------------------------------------------
// Row / RowKey
// ---------------------------------------------------------------------------

/// A record of any logical table, used where a step must carry data for an
/// arbitrary table (saga plans).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "table", content = "record", rename_all = "snake_case")]
pub enum Row {
    Class(ClassRecord),
    Student(StudentRecord),
    ScoreStage1(Stage1Score),
    ScoreStage23(Stage23Score),
}

impl Row {
    #[must_use]
    pub fn table(&self) -> LogicalTable {
        match self {
            Self::Class(_) => LogicalTable::Class,
            Self::Student(_) => LogicalTable::Student,
            Self::ScoreStage1(_) => LogicalTable::ScoreStage1,
            Self::ScoreStage23(_) => LogicalTable::ScoreStage23,
        }
    }

    #[must_use]
    pub fn key(&self) -> RowKey {
        match self {
            Self::Class(r) => ClassRecord::row_key(r.key()),
            Self::Student(r) => StudentRecord::row_key(r.key()),
            Self::ScoreStage1(r) => Stage1Score::row_key(r.key()),
            Self::ScoreStage23(r) => Stage23Score::row_key(r.key()),
        }
    }
}

/// The primary key of a row of any logical table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "table", content = "key", rename_all = "snake_case")]
pub enum RowKey {
    Class(String),
    Student(String),
    ScoreStage1(ScoreKey),
    ScoreStage23(ScoreKey),
}

impl RowKey {
    #[must_use]
    pub fn table(&self) -> LogicalTable {
        match self {
            Self::Class(_) => LogicalTable::Class,
            Self::Student(_) => LogicalTable::Student,
            Self::ScoreStage1(_) => LogicalTable::ScoreStage1,
            Self::ScoreStage23(_) => LogicalTable::ScoreStage23,
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(k) | Self::Student(k) => write!(f, "{}:{k}", self.table()),
            Self::ScoreStage1(k) | Self::ScoreStage23(k) => write!(f, "{}:{k}", self.table()),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity trait
// ---------------------------------------------------------------------------

/// Where the department of a record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The record has a `department` field.
    Stored,
    /// The department of the class named by the record's `class_id`.
    ByClass,
    /// The department of the student named by the record's `student_id`.
    ByStudent,
}

/// A typed record of one logical table.
///
/// `field` exposes attributes by name for predicate evaluation and sorting;
/// unknown names yield `None`.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Ord + fmt::Display + fmt::Debug + Send + Sync + 'static;

    const TABLE: LogicalTable;

    const PLACEMENT: Placement;

    fn key(&self) -> Self::Key;

    fn field(&self, name: &str) -> Option<FieldValue>;

    fn into_row(self) -> Row;

    fn from_row(row: Row) -> Option<Self>;

    fn row_key(key: Self::Key) -> RowKey;

    fn from_row_key(key: RowKey) -> Option<Self::Key>;
}

impl Entity for ClassRecord {
    type Key = String;

    const TABLE: LogicalTable = LogicalTable::Class;
    const PLACEMENT: Placement = Placement::Stored;

    fn key(&self) -> String {
        self.class_id.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "class_id" => Some(FieldValue::from(self.class_id.as_str())),
            "name" => Some(FieldValue::from(self.name.as_str())),
            DEPARTMENT_FIELD => Some(FieldValue::from(self.department.as_str())),
            _ => None,
        }
    }

    fn into_row(self) -> Row {
        Row::Class(self)
    }

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::Class(r) => Some(r),
            _ => None,
        }
    }

    fn row_key(key: String) -> RowKey {
        RowKey::Class(key)
    }

    fn from_row_key(key: RowKey) -> Option<String> {
        match key {
            RowKey::Class(k) => Some(k),
            _ => None,
        }
    }
}

impl Entity for StudentRecord {
    type Key = String;

    const TABLE: LogicalTable = LogicalTable::Student;
    const PLACEMENT: Placement = Placement::ByClass;

    fn key(&self) -> String {
        self.student_id.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "student_id" => Some(FieldValue::from(self.student_id.as_str())),
            "full_name" => Some(FieldValue::from(self.full_name.as_str())),
            "gender" => self.gender.as_deref().map(FieldValue::from),
            "birth_date" => self.birth_date.as_deref().map(FieldValue::from),
            "class_id" => Some(FieldValue::from(self.class_id.as_str())),
            "scholarship" => self.scholarship.map(FieldValue::Number),
            _ => None,
        }
    }

    fn into_row(self) -> Row {
        Row::Student(self)
    }

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::Student(r) => Some(r),
            _ => None,
        }
    }

    fn row_key(key: String) -> RowKey {
        RowKey::Student(key)
    }

    fn from_row_key(key: RowKey) -> Option<String> {
        match key {
            RowKey::Student(k) => Some(k),
            _ => None,
        }
    }
}

impl Entity for Stage1Score {
    type Key = ScoreKey;

    const TABLE: LogicalTable = LogicalTable::ScoreStage1;
    const PLACEMENT: Placement = Placement::ByStudent;

    fn key(&self) -> ScoreKey {
        ScoreKey::new(self.student_id.clone(), self.subject_id.clone())
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "student_id" => Some(FieldValue::from(self.student_id.as_str())),
            "subject_id" => Some(FieldValue::from(self.subject_id.as_str())),
            "score1" => self.score1.map(FieldValue::Number),
            _ => None,
        }
    }

    fn into_row(self) -> Row {
        Row::ScoreStage1(self)
    }

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::ScoreStage1(r) => Some(r),
            _ => None,
        }
    }

    fn row_key(key: ScoreKey) -> RowKey {
        RowKey::ScoreStage1(key)
    }

    fn from_row_key(key: RowKey) -> Option<ScoreKey> {
        match key {
            RowKey::ScoreStage1(k) => Some(k),
            _ => None,
        }
    }
}

impl Entity for Stage23Score {
    type Key = ScoreKey;

    const TABLE: LogicalTable = LogicalTable::ScoreStage23;
    const PLACEMENT: Placement = Placement::ByStudent;

    fn key(&self) -> ScoreKey {
        ScoreKey::new(self.student_id.clone(), self.subject_id.clone())
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "student_id" => Some(FieldValue::from(self.student_id.as_str())),
            "subject_id" => Some(FieldValue::from(self.subject_id.as_str())),
            "score2" => self.score2.map(FieldValue::Number),
            "score3" => self.score3.map(FieldValue::Number),
            _ => None,
        }
    }

    fn into_row(self) -> Row {
        Row::ScoreStage23(self)
    }

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::ScoreStage23(r) => Some(r),
            _ => None,
        }
    }

    fn row_key(key: ScoreKey) -> RowKey {
        RowKey::ScoreStage23(key)
    }

    fn from_row_key(key: RowKey) -> Option<ScoreKey> {
        match key {
            RowKey::ScoreStage23(k) => Some(k),
            _ => None,
        }
    }
}
