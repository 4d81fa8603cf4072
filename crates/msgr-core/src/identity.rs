//! User identity and message records shared by client and server.

use crate::codec::{MAX_FIELD_LEN, TERMINATOR};
use crate::error::{MsgrError, MsgrResult};

/// A registered user. `alias` is the routing key and must be unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub username: String,
    pub alias: String,
    pub date_of_birth: String,
}

impl Identity {
    pub fn new(
        username: impl Into<String>,
        alias: impl Into<String>,
        date_of_birth: impl Into<String>,
    ) -> MsgrResult<Self> {
        let identity = Self {
            username: username.into(),
            alias: alias.into(),
            date_of_birth: date_of_birth.into(),
        };
        validate_alias(&identity.alias)?;
        validate_field("username", &identity.username)?;
        validate_field("date of birth", &identity.date_of_birth)?;
        Ok(identity)
    }
}

/// A message accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub sender: String,
    pub recipient: String,
    pub body: String,
}

pub fn validate_alias(alias: &str) -> MsgrResult<()> {
    if alias.trim().is_empty() {
        return Err(MsgrError::Other("alias must not be empty".into()));
    }
    validate_field("alias", alias)
}

fn validate_field(name: &str, value: &str) -> MsgrResult<()> {
    if value.as_bytes().contains(&TERMINATOR) {
        return Err(MsgrError::Framing(format!("{name} contains NUL byte")));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(MsgrError::Framing(format!(
            "{name} exceeds {MAX_FIELD_LEN} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_aliases_with_spaces() {
        let id = Identity::new("Rafael", "el veneco", "01/01/2002").unwrap();
        assert_eq!(id.alias, "el veneco");
    }

    #[test]
    fn rejects_blank_or_nul_alias() {
        assert!(Identity::new("Bob", "   ", "01/01/2000").is_err());
        assert!(Identity::new("Bob", "b\0b", "01/01/2000").is_err());
        assert!(Identity::new("B\0b", "bob", "01/01/2000").is_err());
    }
}
