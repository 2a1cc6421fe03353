use crate::utils::error::{Result, SyncError};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_USER: &str = "user";
pub const DEFAULT_PASSWORD: &str = "12345";
pub const FULL_PERMISSIONS: &str = "elradfmwMT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perm {
    ChangeDir,
    List,
    Read,
    Append,
    Delete,
    Rename,
    MakeDir,
    Write,
    Chmod,
    SetTime,
}

impl Perm {
    const ALL: [Perm; 10] = [
        Perm::ChangeDir,
        Perm::List,
        Perm::Read,
        Perm::Append,
        Perm::Delete,
        Perm::Rename,
        Perm::MakeDir,
        Perm::Write,
        Perm::Chmod,
        Perm::SetTime,
    ];

    pub fn letter(self) -> char {
        match self {
            Perm::ChangeDir => 'e',
            Perm::List => 'l',
            Perm::Read => 'r',
            Perm::Append => 'a',
            Perm::Delete => 'd',
            Perm::Rename => 'f',
            Perm::MakeDir => 'm',
            Perm::Write => 'w',
            Perm::Chmod => 'M',
            Perm::SetTime => 'T',
        }
    }

    fn from_letter(c: char) -> Option<Perm> {
        Perm::ALL.into_iter().find(|p| p.letter() == c)
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Permission set in pyftpdlib's letter notation, e.g. `elradfmwMT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(u16);

impl Permissions {
    pub fn parse(letters: &str) -> Result<Self> {
        let mut bits = 0;
        for c in letters.chars() {
            let perm = Perm::from_letter(c).ok_or_else(|| SyncError::InvalidConfigValueError {
                field: "perm".to_string(),
                value: letters.to_string(),
                reason: format!("unknown permission '{}'; valid letters are {}", c, FULL_PERMISSIONS),
            })?;
            bits |= perm.bit();
        }
        Ok(Self(bits))
    }

    pub fn full() -> Self {
        Perm::ALL.into_iter().fold(Self(0), |acc, p| Self(acc.0 | p.bit()))
    }

    pub fn allows(&self, perm: Perm) -> bool {
        self.0 & perm.bit() != 0
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for perm in Perm::ALL {
            if self.allows(perm) {
                write!(f, "{}", perm.letter())?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UserAccount {
    pub name: String,
    password: String,
    pub home: PathBuf,
    pub perms: Permissions,
}

/// Virtual users known to the server.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    users: HashMap<String, UserAccount>,
}

impl Authorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(
        &mut self,
        name: &str,
        password: &str,
        home: impl Into<PathBuf>,
        perm: &str,
    ) -> Result<()> {
        if self.users.contains_key(name) {
            return Err(SyncError::ConfigValidationError {
                field: "server.users".to_string(),
                message: format!("user '{}' already exists", name),
            });
        }
        let home = home.into();
        if !home.is_dir() {
            return Err(SyncError::InvalidConfigValueError {
                field: "server.users.home".to_string(),
                value: home.display().to_string(),
                reason: "home directory does not exist".to_string(),
            });
        }
        let account = UserAccount {
            name: name.to_string(),
            password: password.to_string(),
            home,
            perms: Permissions::parse(perm)?,
        };
        self.users.insert(name.to_string(), account);
        Ok(())
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.users.contains_key(name)
    }

    pub fn authenticate(&self, name: &str, password: &str) -> Option<&UserAccount> {
        self.users
            .get(name)
            .filter(|account| account.password == password)
    }
}
