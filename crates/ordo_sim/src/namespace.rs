//! In-memory namespace container and its executor.
//!
//! Stands in for the shared hierarchical file: groups, datasets and
//! committed datatypes addressed by absolute path, each carrying named
//! attributes. Operations travel as postcard-encoded proposal payloads
//! tagged with their op-type code.

use bytes::Bytes;
use ordo_coordinator::{Executor, ExecutorError};
use ordo_core::{Clock, CoreError, CoreResult, ProposalId, Rank};
use ordo_proposal::{OpTag, Proposal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Op-type codes carried in the proposal envelope
pub mod tag {
    use ordo_proposal::OpTag;

    /// Collective close of the container
    pub const FILE_CLOSE: OpTag = OpTag::new(0);
    /// Create dataset
    pub const DS_CREATE: OpTag = OpTag::new(1);
    /// Open dataset
    pub const DS_OPEN: OpTag = OpTag::new(2);
    /// Extend dataset dimensions
    pub const DS_EXTEND: OpTag = OpTag::new(3);
    /// Close dataset
    pub const DS_CLOSE: OpTag = OpTag::new(4);
    /// Create group
    pub const GROUP_CREATE: OpTag = OpTag::new(5);
    /// Open group
    pub const GROUP_OPEN: OpTag = OpTag::new(6);
    /// Close group
    pub const GROUP_CLOSE: OpTag = OpTag::new(7);
    /// Create attribute
    pub const ATTR_CREATE: OpTag = OpTag::new(8);
    /// Write attribute
    pub const ATTR_WRITE: OpTag = OpTag::new(9);
    /// Commit named datatype
    pub const DT_COMMIT: OpTag = OpTag::new(10);
}

/// Namespace mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceOp {
    /// Close the container on every rank
    Close,
    /// Create a dataset
    CreateDataset {
        /// Absolute path
        path: String,
        /// Initial extent
        dims: Vec<u64>,
    },
    /// Open a dataset
    OpenDataset {
        /// Absolute path
        path: String,
    },
    /// Grow a dataset
    ExtendDataset {
        /// Absolute path
        path: String,
        /// New extent, no smaller than the current one
        dims: Vec<u64>,
    },
    /// Close a dataset
    CloseDataset {
        /// Absolute path
        path: String,
    },
    /// Create a group
    CreateGroup {
        /// Absolute path
        path: String,
    },
    /// Open a group
    OpenGroup {
        /// Absolute path
        path: String,
    },
    /// Close a group
    CloseGroup {
        /// Absolute path
        path: String,
    },
    /// Create an empty attribute
    CreateAttribute {
        /// Object path
        path: String,
        /// Attribute name
        name: String,
    },
    /// Set an attribute value
    WriteAttribute {
        /// Object path
        path: String,
        /// Attribute name
        name: String,
        /// Raw value
        value: Vec<u8>,
    },
    /// Commit a named datatype
    CommitDatatype {
        /// Absolute path
        path: String,
    },
}

impl NamespaceOp {
    /// Op-type code of this operation
    #[must_use]
    pub const fn tag(&self) -> OpTag {
        match self {
            Self::Close => tag::FILE_CLOSE,
            Self::CreateDataset { .. } => tag::DS_CREATE,
            Self::OpenDataset { .. } => tag::DS_OPEN,
            Self::ExtendDataset { .. } => tag::DS_EXTEND,
            Self::CloseDataset { .. } => tag::DS_CLOSE,
            Self::CreateGroup { .. } => tag::GROUP_CREATE,
            Self::OpenGroup { .. } => tag::GROUP_OPEN,
            Self::CloseGroup { .. } => tag::GROUP_CLOSE,
            Self::CreateAttribute { .. } => tag::ATTR_CREATE,
            Self::WriteAttribute { .. } => tag::ATTR_WRITE,
            Self::CommitDatatype { .. } => tag::DT_COMMIT,
        }
    }

    /// Encode parameters as a proposal payload
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn encode(&self) -> CoreResult<Bytes> {
        Ok(Bytes::from(postcard::to_allocvec(self)?))
    }

    /// Decode a payload carried under `tag`
    ///
    /// # Errors
    ///
    /// Returns error if the tag is unknown or the payload does not match it
    pub fn decode(tag: OpTag, payload: &[u8]) -> Result<Self, ExecutorError> {
        if !(tag::FILE_CLOSE.as_i32()..=tag::DT_COMMIT.as_i32()).contains(&tag.as_i32()) {
            return Err(ExecutorError::UnknownOp(tag));
        }
        let op: Self = postcard::from_bytes(payload).map_err(|err| ExecutorError::InvalidPayload {
            tag,
            reason: err.to_string(),
        })?;
        if op.tag() != tag {
            return Err(ExecutorError::InvalidPayload {
                tag,
                reason: format!("payload encodes {}", op.tag()),
            });
        }
        Ok(op)
    }

    /// Wrap into a proposal stamped now
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be encoded
    pub fn into_proposal(self, id: ProposalId, clock: &dyn Clock) -> CoreResult<Proposal> {
        Ok(Proposal::new(id, self.tag(), self.encode()?, clock))
    }

    fn path(&self) -> &str {
        match self {
            Self::Close => "/",
            Self::CreateDataset { path, .. }
            | Self::OpenDataset { path }
            | Self::ExtendDataset { path, .. }
            | Self::CloseDataset { path }
            | Self::CreateGroup { path }
            | Self::OpenGroup { path }
            | Self::CloseGroup { path }
            | Self::CreateAttribute { path, .. }
            | Self::WriteAttribute { path, .. }
            | Self::CommitDatatype { path } => path,
        }
    }
}

/// Kind of namespace object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Container of other objects
    Group,
    /// N-dimensional array
    Dataset {
        /// Current extent
        dims: Vec<u64>,
    },
    /// Named datatype
    Datatype,
}

/// One object in the namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Kind
    pub kind: ObjectKind,
    /// Attributes, `None` until first written
    pub attributes: BTreeMap<String, Option<Vec<u8>>>,
    /// Open handles
    pub open: u32,
}

impl Object {
    fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            attributes: BTreeMap::new(),
            open: 0,
        }
    }
}

/// Hierarchical namespace keyed by absolute path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    objects: BTreeMap<String, Object>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    /// Create a namespace holding only the root group
    #[must_use]
    pub fn new() -> Self {
        let mut objects = BTreeMap::new();
        objects.insert("/".to_string(), Object::new(ObjectKind::Group));
        Self { objects }
    }

    /// Look up an object
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Object> {
        self.objects.get(path)
    }

    /// Number of objects, root included
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether only the root group exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.len() == 1
    }

    /// Apply one operation
    ///
    /// # Errors
    ///
    /// Returns error if the operation does not fit the current namespace
    pub fn apply(&mut self, op: &NamespaceOp) -> CoreResult<()> {
        match op {
            NamespaceOp::Close => Ok(()),
            NamespaceOp::CreateGroup { path } => self.create(path, ObjectKind::Group),
            NamespaceOp::CreateDataset { path, dims } => {
                self.create(path, ObjectKind::Dataset { dims: dims.clone() })
            }
            NamespaceOp::CommitDatatype { path } => self.create(path, ObjectKind::Datatype),
            NamespaceOp::OpenDataset { path } | NamespaceOp::OpenGroup { path } => {
                self.lookup_mut(path)?.open += 1;
                Ok(())
            }
            NamespaceOp::CloseDataset { path } | NamespaceOp::CloseGroup { path } => {
                let object = self.lookup_mut(path)?;
                object.open = object.open.checked_sub(1).ok_or_else(|| CoreError::Validation {
                    field: "path".to_string(),
                    reason: format!("{} is not open", path),
                })?;
                Ok(())
            }
            NamespaceOp::ExtendDataset { path, dims } => {
                let object = self.lookup_mut(path)?;
                let ObjectKind::Dataset { dims: current } = &mut object.kind else {
                    return Err(CoreError::Validation {
                        field: "path".to_string(),
                        reason: format!("{} is not a dataset", path),
                    });
                };
                let grows = dims.len() == current.len() && dims.iter().zip(current.iter()).all(|(n, c)| n >= c);
                if !grows {
                    return Err(CoreError::Validation {
                        field: "dims".to_string(),
                        reason: format!("cannot shrink or reshape {:?} to {:?}", current, dims),
                    });
                }
                *current = dims.clone();
                Ok(())
            }
            NamespaceOp::CreateAttribute { path, name } => {
                let object = self.lookup_mut(path)?;
                if object.attributes.contains_key(name) {
                    return Err(CoreError::Validation {
                        field: "name".to_string(),
                        reason: format!("attribute {} already exists on {}", name, path),
                    });
                }
                object.attributes.insert(name.clone(), None);
                Ok(())
            }
            NamespaceOp::WriteAttribute { path, name, value } => {
                let slot = self
                    .lookup_mut(path)?
                    .attributes
                    .get_mut(name)
                    .ok_or_else(|| CoreError::NotFound {
                        kind: "attribute".to_string(),
                        id: format!("{}@{}", path, name),
                    })?;
                *slot = Some(value.clone());
                Ok(())
            }
        }
    }

    fn create(&mut self, path: &str, kind: ObjectKind) -> CoreResult<()> {
        let parent = parent_of(path).ok_or_else(|| CoreError::Validation {
            field: "path".to_string(),
            reason: format!("{} is not an absolute child path", path),
        })?;
        match self.objects.get(parent) {
            Some(Object { kind: ObjectKind::Group, .. }) => {}
            Some(_) => {
                return Err(CoreError::Validation {
                    field: "path".to_string(),
                    reason: format!("parent {} is not a group", parent),
                });
            }
            None => {
                return Err(CoreError::NotFound {
                    kind: "group".to_string(),
                    id: parent.to_string(),
                });
            }
        }
        if self.objects.contains_key(path) {
            return Err(CoreError::Validation {
                field: "path".to_string(),
                reason: format!("{} already exists", path),
            });
        }
        self.objects.insert(path.to_string(), Object::new(kind));
        Ok(())
    }

    fn lookup_mut(&mut self, path: &str) -> CoreResult<&mut Object> {
        self.objects.get_mut(path).ok_or_else(|| CoreError::NotFound {
            kind: "object".to_string(),
            id: path.to_string(),
        })
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
        return None;
    }
    let cut = path.rfind('/')?;
    Some(if cut == 0 { "/" } else { &path[..cut] })
}

/// One executed operation as seen by a rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Proposal id
    pub id: i32,
    /// Creation timestamp in microseconds
    pub created_at: u64,
    /// Op-type code
    pub tag: i32,
}

/// Handle returned to the rank that originated an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHandle {
    /// Per-rank handle serial
    pub serial: u64,
    /// Object the operation touched
    pub path: String,
}

/// Executor applying namespace operations in agreed order
#[derive(Debug, Clone)]
pub struct NamespaceExecutor {
    rank: Rank,
    namespace: Namespace,
    log: Vec<LogEntry>,
    closes: usize,
    next_serial: u64,
}

impl NamespaceExecutor {
    /// Create an executor over an empty namespace
    #[must_use]
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            namespace: Namespace::new(),
            log: Vec::new(),
            closes: 0,
            next_serial: 0,
        }
    }

    /// Current namespace
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Executed operations, in execution order
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Close proposals executed so far
    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes
    }
}

impl Executor for NamespaceExecutor {
    type Handle = ObjectHandle;

    fn execute(&mut self, proposal: &Proposal) -> Result<Option<ObjectHandle>, ExecutorError> {
        let op = NamespaceOp::decode(proposal.op_tag(), proposal.payload())?;
        self.namespace
            .apply(&op)
            .map_err(|err| ExecutorError::Failed(err.to_string()))?;

        self.log.push(LogEntry {
            id: proposal.id().as_i32(),
            created_at: proposal.created_at().as_micros(),
            tag: op.tag().as_i32(),
        });
        if op == NamespaceOp::Close {
            self.closes += 1;
            tracing::debug!(rank = %self.rank, closes = self.closes, "close executed");
        }

        if !proposal.is_local() {
            return Ok(None);
        }
        self.next_serial += 1;
        Ok(Some(ObjectHandle {
            serial: self.next_serial,
            path: op.path().to_string(),
        }))
    }
}
