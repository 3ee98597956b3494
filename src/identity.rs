use serde::{Deserialize, Serialize};

/// A committer/author identity: name and email, parsed leniently from
/// strings of the form `"Name <email>"`. Per §9, if either half is empty the
/// structured identity is still recorded rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parse `"Name <email>"`. Missing angle brackets leave `email` empty;
    /// an empty name before `<` leaves `name` empty. Never fails.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match (s.find('<'), s.find('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = s[..open].trim().to_string();
                let email = s[open + 1..close].trim().to_string();
                Self { name, email }
            }
            _ => Self {
                name: s.to_string(),
                email: String::new(),
            },
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}
