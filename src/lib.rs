//! Client-side state engine for a remote encrypted file vault: navigation,
//! filtering and selection, upload job tracking, and the authentication
//! session with its lockout and expiry rules.

pub mod client;
pub mod clock;
pub mod config;
pub mod config_paths;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod model;
pub mod navigation;
pub mod remote;
pub mod selection;
pub mod session;
pub mod upload;
pub mod view;

pub use client::{Breadcrumb, VaultClient, ViewSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, RemoteError, Result};
pub use model::{FileId, FileRecord, FolderId, FolderRecord, ItemKind, ItemRef, JobToken};
pub use remote::{Channel, Credential, Notification, SubscriptionId, VaultService};
pub use selection::{SelectMode, SelectionState};
pub use session::{AuthSnapshot, AuthState, LockoutPolicy, SessionEnd};
pub use upload::{UploadEvent, UploadHandle, UploadOutcome, UploadProgress};
pub use view::{SortDirection, SortField, ViewCriteria};
