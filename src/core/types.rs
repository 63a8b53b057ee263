//! PF-001: Domain types for preparations, steps, grid content and session events.
//!
//! Everything the orchestrator exchanges with its collaborators derives
//! Serialize/Deserialize so the local store and the JSONL journal can persist it.

use super::action::{FilterTree, Scope};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered action parameter map. Values are arbitrary JSON (tokens, filter trees).
pub type Parameters = IndexMap<String, serde_json::Value>;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Opaque content-addressed step identifier assigned by the backend.
    StepId
);
string_id!(
    /// Opaque preparation identifier.
    PreparationId
);
string_id!(
    /// Opaque dataset identifier.
    DatasetId
);
string_id!(
    /// Folder path a preparation lives in.
    FolderId
);

// ============================================================================
// Preparations and steps
// ============================================================================

/// A named, persisted chain of transformation steps over one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preparation {
    pub id: PreparationId,

    pub name: String,

    pub dataset_id: DatasetId,

    /// Folder the preparation is stored in
    pub folder_id: FolderId,

    /// True until the user explicitly names or saves it (client-side tag)
    #[serde(default)]
    pub draft: bool,
}

/// Wire form of one action: a name and a flat parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action: String,

    #[serde(default)]
    pub parameters: Parameters,
}

impl ActionSpec {
    pub fn new(action: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            action: action.into(),
            parameters,
        }
    }

    /// String value of a parameter, if present and a string.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

/// One step of a recipe as the client sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,

    pub action: String,

    #[serde(default)]
    pub parameters: Parameters,

    /// Soft-disabled (part of the disabled tail)
    #[serde(default)]
    pub inactive: bool,
}

impl Step {
    /// Synthetic no-op step every chain starts from.
    pub fn initial(id: StepId) -> Self {
        Self {
            id,
            action: String::new(),
            parameters: Parameters::new(),
            inactive: false,
        }
    }

    /// Column the step targets, if any.
    pub fn column_id(&self) -> Option<&str> {
        self.parameters.get("column_id").and_then(|v| v.as_str())
    }
}

/// Authoritative step chain returned by `get_details`.
///
/// `steps[0]` is the root (initial) step id; `actions[i]` belongs to `steps[i + 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparationDetails {
    pub preparation: Preparation,

    pub steps: Vec<StepId>,

    #[serde(default)]
    pub actions: Vec<ActionSpec>,

    /// Step ids the backend reports as disabled
    #[serde(default)]
    pub inactive: Vec<StepId>,
}

impl PreparationDetails {
    /// Root step id, if the payload carries one.
    pub fn root(&self) -> Option<&StepId> {
        self.steps.first()
    }

    /// Head step id (root when the chain is empty).
    pub fn head(&self) -> Option<&StepId> {
        self.steps.last()
    }
}

/// Content address: the chain head or a specific step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Version {
    Head,
    Step(StepId),
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Head => write!(f, "head"),
            Version::Step(id) => write!(f, "{}", id),
        }
    }
}

/// How much of the content to fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    #[default]
    Head,
    Full,
}

/// Number of records a `Head` sample returns.
pub const HEAD_SAMPLE_SIZE: usize = 10_000;

// ============================================================================
// Grid content
// ============================================================================

/// Column metadata as rendered in the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub id: String,

    pub name: String,

    #[serde(rename = "type", default = "default_column_type")]
    pub column_type: String,

    #[serde(default)]
    pub domain: String,
}

fn default_column_type() -> String {
    "string".to_string()
}

/// A single row. `tdp_id` is the stable row id used by line/cell scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRecord {
    #[serde(rename = "tdpId")]
    pub tdp_id: u64,

    #[serde(flatten)]
    pub values: IndexMap<String, String>,
}

impl GridRecord {
    pub fn get(&self, column_id: &str) -> Option<&str> {
        self.values.get(column_id).map(|s| s.as_str())
    }
}

/// Tabular content at one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridContent {
    pub columns: Vec<ColumnMetadata>,

    pub records: Vec<GridRecord>,
}

impl GridContent {
    pub fn column(&self, id: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_mut(&mut self, id: &str) -> Option<&mut ColumnMetadata> {
        self.columns.iter_mut().find(|c| c.id == id)
    }

    /// All values of one column, in record order.
    pub fn column_values(&self, id: &str) -> Vec<&str> {
        self.records.iter().filter_map(|r| r.get(id)).collect()
    }
}

/// Reference to a column targeted by an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub id: String,

    #[serde(default)]
    pub name: String,
}

impl ColumnRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Metadata change for one column (type and/or domain).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnPatch {
    #[serde(default, rename = "type")]
    pub column_type: Option<String>,

    #[serde(default)]
    pub domain: Option<String>,
}

// ============================================================================
// Datasets
// ============================================================================

/// Parsing parameters of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetParameters {
    #[serde(default = "default_separator")]
    pub separator: String,

    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl Default for DatasetParameters {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            encoding: default_encoding(),
        }
    }
}

fn default_separator() -> String {
    ",".to_string()
}

fn default_encoding() -> String {
    "UTF-8".to_string()
}

/// Dataset metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub id: DatasetId,

    pub name: String,

    #[serde(default)]
    pub parameters: DatasetParameters,

    /// Record count from the last parse
    #[serde(default)]
    pub records: usize,
}

// ============================================================================
// Configuration
// ============================================================================

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaygroundConfig {
    /// Folder new drafts are created in
    #[serde(default = "default_home_folder")]
    pub home_folder: FolderId,

    /// Appended to the dataset name to name a draft
    #[serde(default = "default_draft_suffix")]
    pub draft_suffix: String,

    #[serde(default)]
    pub sample_type: SampleType,

    /// Emit tour signals on the 1st and 3rd step
    #[serde(default = "default_true")]
    pub tours: bool,

    /// Directory for the JSONL session journal
    #[serde(default)]
    pub journal_dir: Option<std::path::PathBuf>,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            home_folder: default_home_folder(),
            draft_suffix: default_draft_suffix(),
            sample_type: SampleType::default(),
            tours: true,
            journal_dir: None,
        }
    }
}

fn default_home_folder() -> FolderId {
    FolderId::new("/")
}

fn default_draft_suffix() -> String {
    " Preparation".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Session journal
// ============================================================================

/// Journal event emitted after each successful session operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    PreparationCreated {
        preparation: PreparationId,
        name: String,
        draft: bool,
    },
    PreparationRenamed {
        preparation: PreparationId,
        from: String,
        to: String,
    },
    PreparationDeleted {
        preparation: PreparationId,
    },
    PreparationMoved {
        preparation: PreparationId,
        folder: FolderId,
        name: String,
    },
    StepsAppended {
        preparation: PreparationId,
        head: StepId,
        actions: Vec<String>,
    },
    StepUpdated {
        preparation: PreparationId,
        step: StepId,
        head: StepId,
    },
    StepMoved {
        preparation: PreparationId,
        step: StepId,
        parent: StepId,
    },
    StepRemoved {
        preparation: PreparationId,
        step: StepId,
    },
    StepsCopied {
        preparation: PreparationId,
        from: PreparationId,
        head: StepId,
    },
    HeadMoved {
        preparation: PreparationId,
        head: StepId,
    },
}

/// A session event with a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: SessionEvent,
}

// ============================================================================
// Scripts
// ============================================================================

/// A replayable playground session: datasets plus an operation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaygroundScript {
    pub version: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub config: PlaygroundConfig,

    #[serde(default)]
    pub datasets: IndexMap<DatasetId, ScriptDataset>,

    /// Dataset to open (defaults to the first one listed)
    #[serde(default)]
    pub dataset: Option<DatasetId>,

    /// Stored preparation to open instead of a dataset
    #[serde(default)]
    pub preparation: Option<PreparationId>,

    #[serde(default)]
    pub operations: Vec<ScriptOp>,
}

impl PlaygroundScript {
    /// The dataset the session starts from.
    pub fn start_dataset(&self) -> Option<&DatasetId> {
        self.dataset.as_ref().or_else(|| self.datasets.keys().next())
    }
}

/// Dataset declared inline (`csv`) or by file (`path`, relative to the script).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDataset {
    pub name: String,

    #[serde(default)]
    pub csv: Option<String>,

    #[serde(default)]
    pub path: Option<std::path::PathBuf>,

    #[serde(default)]
    pub parameters: DatasetParameters,
}

/// One scripted playground operation. Steps are addressed by 0-based recipe
/// position; columns by id or display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptOp {
    Append {
        action: String,
        #[serde(default = "default_scope")]
        scope: Scope,
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        row: Option<u64>,
        #[serde(default)]
        parameters: Parameters,
        #[serde(default)]
        filter: Option<FilterTree>,
    },
    Update {
        step: usize,
        parameters: Parameters,
    },
    Preview {
        step: usize,
        parameters: Parameters,
    },
    Move {
        from: i64,
        to: i64,
    },
    Remove {
        step: usize,
    },
    Toggle {
        step: usize,
    },
    Rename {
        name: String,
    },
    EditCell {
        row: u64,
        column: String,
        value: String,
        #[serde(default)]
        update_all: bool,
    },
    DatasetParams {
        #[serde(default)]
        separator: Option<String>,
        #[serde(default)]
        encoding: Option<String>,
    },
    ChangeColumn {
        column: String,
        #[serde(default, rename = "type")]
        column_type: Option<String>,
        #[serde(default)]
        domain: Option<String>,
    },
    Save {
        folder: FolderId,
        name: String,
    },
    Copy {
        from: PreparationId,
    },
    Undo,
    Redo,
    Close,
}

fn default_scope() -> Scope {
    Scope::Column
}

impl ScriptOp {
    /// Operation tag as written in scripts.
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptOp::Append { .. } => "append",
            ScriptOp::Update { .. } => "update",
            ScriptOp::Preview { .. } => "preview",
            ScriptOp::Move { .. } => "move",
            ScriptOp::Remove { .. } => "remove",
            ScriptOp::Toggle { .. } => "toggle",
            ScriptOp::Rename { .. } => "rename",
            ScriptOp::EditCell { .. } => "edit_cell",
            ScriptOp::DatasetParams { .. } => "dataset_params",
            ScriptOp::ChangeColumn { .. } => "change_column",
            ScriptOp::Save { .. } => "save",
            ScriptOp::Copy { .. } => "copy",
            ScriptOp::Undo => "undo",
            ScriptOp::Redo => "redo",
            ScriptOp::Close => "close",
        }
    }
}
