//! Fetch primitive identities.

use serde::{Deserialize, Serialize};

/// The nine fetch primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Count,
    Get,
    GetList,
    CreateOne,
    CreateMultiple,
    UpdateOne,
    UpdateMultiple,
    DeleteOne,
    DeleteMultiple,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::Count,
        Action::Get,
        Action::GetList,
        Action::CreateOne,
        Action::CreateMultiple,
        Action::UpdateOne,
        Action::UpdateMultiple,
        Action::DeleteOne,
        Action::DeleteMultiple,
    ];

    /// Get operation name for metrics/logging and cache signatures
    pub fn name(&self) -> &'static str {
        match self {
            Action::Count => "count",
            Action::Get => "get",
            Action::GetList => "getList",
            Action::CreateOne => "createOne",
            Action::CreateMultiple => "createMultiple",
            Action::UpdateOne => "updateOne",
            Action::UpdateMultiple => "updateMultiple",
            Action::DeleteOne => "deleteOne",
            Action::DeleteMultiple => "deleteMultiple",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Action::Count | Action::Get | Action::GetList)
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Action::CreateOne | Action::CreateMultiple)
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Action::UpdateOne | Action::UpdateMultiple)
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Action::DeleteOne | Action::DeleteMultiple)
    }

    /// Whether the primitive selects records through a query
    pub fn selects(&self) -> bool {
        !self.is_create()
    }
}
