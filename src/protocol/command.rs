use crate::utils::error::{Result, SyncError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferType {
    Ascii,
    #[default]
    Binary,
}

/// A control-connection command, as sent by the client and parsed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    User(String),
    Pass(String),
    Syst,
    Feat,
    Pwd,
    Cwd(String),
    Cdup,
    Type(TransferType),
    Pasv,
    Epsv,
    Stor(String),
    Appe(String),
    Retr(String),
    Mkd(String),
    Rmd(String),
    Dele(String),
    Rnfr(String),
    Rnto(String),
    Size(String),
    Mdtm(String),
    Xmd5(String),
    Mlsd(Option<String>),
    Nlst(Option<String>),
    List(Option<String>),
    Opts(String),
    Noop,
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Command> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb, Some(arg)),
            None => (line, None),
        };
        let verb = verb.to_ascii_uppercase();
        let arg = arg.filter(|a| !a.is_empty());

        let required = |arg: Option<&str>| -> Result<String> {
            arg.map(str::to_string)
                .ok_or_else(|| SyncError::protocol(format!("{} requires an argument", verb)))
        };
        // LIST/NLST clients commonly send ls-style flags; they carry no path
        let optional_path = |arg: Option<&str>| -> Option<String> {
            arg.filter(|a| !a.starts_with('-')).map(str::to_string)
        };

        let command = match verb.as_str() {
            "USER" => Command::User(required(arg)?),
            "PASS" => Command::Pass(arg.unwrap_or_default().to_string()),
            "SYST" => Command::Syst,
            "FEAT" => Command::Feat,
            "PWD" | "XPWD" => Command::Pwd,
            "CWD" | "XCWD" => Command::Cwd(required(arg)?),
            "CDUP" | "XCUP" => Command::Cdup,
            "TYPE" => match arg.map(|a| a.to_ascii_uppercase()) {
                Some(t) if t.starts_with('A') => Command::Type(TransferType::Ascii),
                Some(t) if t.starts_with('I') || t.starts_with('L') => {
                    Command::Type(TransferType::Binary)
                }
                Some(t) => {
                    return Err(SyncError::protocol(format!("unsupported type '{}'", t)));
                }
                None => return Err(SyncError::protocol("TYPE requires an argument")),
            },
            "PASV" => Command::Pasv,
            "EPSV" => Command::Epsv,
            "STOR" => Command::Stor(required(arg)?),
            "APPE" => Command::Appe(required(arg)?),
            "RETR" => Command::Retr(required(arg)?),
            "MKD" | "XMKD" => Command::Mkd(required(arg)?),
            "RMD" | "XRMD" => Command::Rmd(required(arg)?),
            "DELE" => Command::Dele(required(arg)?),
            "RNFR" => Command::Rnfr(required(arg)?),
            "RNTO" => Command::Rnto(required(arg)?),
            "SIZE" => Command::Size(required(arg)?),
            "MDTM" => Command::Mdtm(required(arg)?),
            "XMD5" => Command::Xmd5(required(arg)?),
            "MLSD" => Command::Mlsd(arg.map(str::to_string)),
            "NLST" => Command::Nlst(optional_path(arg)),
            "LIST" => Command::List(optional_path(arg)),
            "OPTS" => Command::Opts(required(arg)?),
            "NOOP" => Command::Noop,
            "QUIT" => Command::Quit,
            _ => Command::Unknown(verb.clone()),
        };
        Ok(command)
    }

    pub fn verb(&self) -> &str {
        match self {
            Command::User(_) => "USER",
            Command::Pass(_) => "PASS",
            Command::Syst => "SYST",
            Command::Feat => "FEAT",
            Command::Pwd => "PWD",
            Command::Cwd(_) => "CWD",
            Command::Cdup => "CDUP",
            Command::Type(_) => "TYPE",
            Command::Pasv => "PASV",
            Command::Epsv => "EPSV",
            Command::Stor(_) => "STOR",
            Command::Appe(_) => "APPE",
            Command::Retr(_) => "RETR",
            Command::Mkd(_) => "MKD",
            Command::Rmd(_) => "RMD",
            Command::Dele(_) => "DELE",
            Command::Rnfr(_) => "RNFR",
            Command::Rnto(_) => "RNTO",
            Command::Size(_) => "SIZE",
            Command::Mdtm(_) => "MDTM",
            Command::Xmd5(_) => "XMD5",
            Command::Mlsd(_) => "MLSD",
            Command::Nlst(_) => "NLST",
            Command::List(_) => "LIST",
            Command::Opts(_) => "OPTS",
            Command::Noop => "NOOP",
            Command::Quit => "QUIT",
            Command::Unknown(verb) => verb,
        }
    }

    /// Rendering safe for logs: the password is masked.
    pub fn redacted(&self) -> String {
        match self {
            Command::Pass(_) => "PASS ******".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::User(a)
            | Command::Pass(a)
            | Command::Cwd(a)
            | Command::Stor(a)
            | Command::Appe(a)
            | Command::Retr(a)
            | Command::Mkd(a)
            | Command::Rmd(a)
            | Command::Dele(a)
            | Command::Rnfr(a)
            | Command::Rnto(a)
            | Command::Size(a)
            | Command::Mdtm(a)
            | Command::Xmd5(a)
            | Command::Opts(a) => write!(f, "{} {}", self.verb(), a),
            Command::Mlsd(Some(a)) | Command::Nlst(Some(a)) | Command::List(Some(a)) => {
                write!(f, "{} {}", self.verb(), a)
            }
            Command::Type(TransferType::Ascii) => f.write_str("TYPE A"),
            Command::Type(TransferType::Binary) => f.write_str("TYPE I"),
            _ => f.write_str(self.verb()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive_with_argument() {
        assert_eq!(
            Command::parse("stor dir/file name.txt\r\n").unwrap(),
            Command::Stor("dir/file name.txt".to_string())
        );
        assert_eq!(Command::parse("XMKD a").unwrap(), Command::Mkd("a".to_string()));
        assert_eq!(Command::parse("type i").unwrap(), Command::Type(TransferType::Binary));
    }

    #[test]
    fn test_missing_argument_is_error() {
        assert!(Command::parse("STOR").is_err());
        assert!(Command::parse("RNFR ").is_err());
        assert!(Command::parse("TYPE X").is_err());
    }

    #[test]
    fn test_unknown_verb() {
        assert_eq!(
            Command::parse("SITE CHMOD 755 x").unwrap(),
            Command::Unknown("SITE".to_string())
        );
    }

    #[test]
    fn test_list_flags_are_not_paths() {
        assert_eq!(Command::parse("LIST -la").unwrap(), Command::List(None));
        assert_eq!(
            Command::parse("NLST sub").unwrap(),
            Command::Nlst(Some("sub".to_string()))
        );
    }

    #[test]
    fn test_display_matches_wire_form() {
        assert_eq!(Command::Rnto("b".to_string()).to_string(), "RNTO b");
        assert_eq!(Command::Mlsd(None).to_string(), "MLSD");
        assert_eq!(Command::Pass("12345".to_string()).redacted(), "PASS ******");
    }
}
