use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::UnboundedSender;

use crate::tree::TreePath;

/// Notifications for whatever view layer is bound to a [crate::model::TagsModel].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeEvent {
    /// The tree is about to be replaced. Paths captured before this are stale afterwards.
    AboutToReset,
    /// The replacement tree is in place.
    ResetComplete,
    /// The node at this path changed (state, box mark, name)
    NodeDataChanged(TreePath),
    /// The set of records shown in the tree changed; an active search must be re-run.
    ResearchRequired,
    /// The persisted user-category mapping was edited.
    UserCategoryChanged,
    /// The restricted category query failed and unrestricted data is shown.
    RestrictionError(String),
}

impl Display for TreeEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TreeEvent::AboutToReset => write!(f, "AboutToReset"),
            TreeEvent::ResetComplete => write!(f, "ResetComplete"),
            TreeEvent::NodeDataChanged(path) => write!(f, "NodeDataChanged({path:?})"),
            TreeEvent::ResearchRequired => write!(f, "ResearchRequired"),
            TreeEvent::UserCategoryChanged => write!(f, "UserCategoryChanged"),
            TreeEvent::RestrictionError(_) => write!(f, "RestrictionError"),
        }
    }
}

/// Optional event channel. Sending never fails the caller: a closed receiver only gets logged.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<UnboundedSender<TreeEvent>>);

impl EventSink {
    pub fn new(tx: Option<UnboundedSender<TreeEvent>>) -> Self {
        EventSink(tx)
    }

    pub fn emit(&self, event: TreeEvent) {
        if let Some(tx) = &self.0 {
            if let Err(e) = tx.send(event) {
                tracing::debug!("Event receiver dropped, could not deliver {}", e.0);
            }
        }
    }
}
