pub mod error;
pub mod persist;
pub mod state;
pub mod store;
pub mod tab;

pub use error::TabError;
pub use persist::{
    load_session_snapshot, restore_session, save_session_snapshot, PersistError, SessionSnapshot,
};
pub use state::{reduce, DropReason, RefreshResult, SaveResult, TabAction, TabOutcome, TabsState};
pub use store::{AutosavePolicy, ConflictAction, SaveDispatch, TabStore, DEFAULT_AUTOSAVE_DELAY};
pub use tab::{ConflictReason, FileInfo, RequestId, SaveState, Tab, TabId};
