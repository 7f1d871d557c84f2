use serde::{Deserialize, Serialize};

/// Durable, realm-scoped identity anchor.
///
/// A subject is created once per real-world user per realm, no matter how
/// many upstream providers that user authenticates through. Protocol
/// adapters never invent subjects; they are resolved (or minted) during
/// identity conversion and then looked up by the authentication manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_id: String,
    pub realm: String,
    pub name: Option<String>,
    pub kind: SubjectKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    Client,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Client => "client",
        }
    }
}

impl std::str::FromStr for SubjectKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SubjectKind::User),
            "client" => Ok(SubjectKind::Client),
            _ => Err(()),
        }
    }
}

impl Subject {
    pub fn user(subject_id: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            realm: realm.into(),
            name: None,
            kind: SubjectKind::User,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }
}
