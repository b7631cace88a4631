//! Fine-grained actions, namespaced by resource kind.
//!
//! The wire form is `"<resource_type>:<verb>"` (e.g. `"document:read"`).
//! Each resource kind has its own closed verb set, so an action can never
//! name a verb its resource does not support.

use permgate_core::ResourceType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! define_verbs {
    ($name:ident { $($variant:ident => $verb:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $verb),+
                }
            }

            fn from_verb(verb: &str) -> Option<Self> {
                match verb {
                    $($verb => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

define_verbs!(DocumentAction {
    Read => "read",
    Write => "write",
    Delete => "delete",
    Share => "share",
    Download => "download",
    Comment => "comment",
    Approve => "approve",
});

define_verbs!(FolderAction {
    Read => "read",
    Create => "create",
    Write => "write",
    Delete => "delete",
    Share => "share",
    Manage => "manage",
});

define_verbs!(WorkflowAction {
    Read => "read",
    Create => "create",
    Execute => "execute",
    Approve => "approve",
    Manage => "manage",
});

define_verbs!(ReportAction {
    View => "view",
    Create => "create",
    Export => "export",
    Schedule => "schedule",
});

define_verbs!(SystemAction {
    Admin => "admin",
    Configure => "configure",
    Audit => "audit",
    ManageUsers => "manage_users",
});

define_verbs!(GlobalAction {
    Admin => "admin",
});

/// An action tag bound to the resource kind it acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    Document(DocumentAction),
    Folder(FolderAction),
    Workflow(WorkflowAction),
    Report(ReportAction),
    System(SystemAction),
    Global(GlobalAction),
}

impl Action {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Action::Document(_) => ResourceType::Document,
            Action::Folder(_) => ResourceType::Folder,
            Action::Workflow(_) => ResourceType::Workflow,
            Action::Report(_) => ResourceType::Report,
            Action::System(_) => ResourceType::System,
            Action::Global(_) => ResourceType::Global,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Action::Document(a) => a.as_str(),
            Action::Folder(a) => a.as_str(),
            Action::Workflow(a) => a.as_str(),
            Action::Report(a) => a.as_str(),
            Action::System(a) => a.as_str(),
            Action::Global(a) => a.as_str(),
        }
    }

    /// Every action defined for a resource type.
    pub fn all_for(resource_type: ResourceType) -> Vec<Action> {
        match resource_type {
            ResourceType::Document => DocumentAction::ALL.iter().copied().map(Action::Document).collect(),
            ResourceType::Folder => FolderAction::ALL.iter().copied().map(Action::Folder).collect(),
            ResourceType::Workflow => WorkflowAction::ALL.iter().copied().map(Action::Workflow).collect(),
            ResourceType::Report => ReportAction::ALL.iter().copied().map(Action::Report).collect(),
            ResourceType::System => SystemAction::ALL.iter().copied().map(Action::System).collect(),
            ResourceType::Global => GlobalAction::ALL.iter().copied().map(Action::Global).collect(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type(), self.verb())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, verb) = s
            .split_once(':')
            .ok_or_else(|| format!("action '{}' must have the form <resource_type>:<verb>", s))?;
        let resource_type: ResourceType = kind.parse()?;
        let verb = verb.to_ascii_lowercase();
        let action = match resource_type {
            ResourceType::Document => DocumentAction::from_verb(&verb).map(Action::Document),
            ResourceType::Folder => FolderAction::from_verb(&verb).map(Action::Folder),
            ResourceType::Workflow => WorkflowAction::from_verb(&verb).map(Action::Workflow),
            ResourceType::Report => ReportAction::from_verb(&verb).map(Action::Report),
            ResourceType::System => SystemAction::from_verb(&verb).map(Action::System),
            ResourceType::Global => GlobalAction::from_verb(&verb).map(Action::Global),
        };
        action.ok_or_else(|| format!("unknown {} action '{}'", resource_type, verb))
    }
}

impl TryFrom<String> for Action {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}
