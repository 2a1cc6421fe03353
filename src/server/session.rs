use crate::core::snapshot::file_md5_async;
use crate::domain::model::{EntryKind, RemoteEntry};
use crate::protocol::listing::{format_list_line, format_mlsd_line, format_timestamp};
use crate::protocol::{format_epsv, format_pasv, Command, Reply, TransferType};
use crate::server::auth::{Perm, UserAccount};
use crate::server::fs::{ResolvedPath, VirtualFs};
use crate::server::ServerContext;
use crate::utils::error::{Result, SyncError};
use crate::utils::fs::list_entries;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

/// Replies either way; `Err` short-circuits a handler with `?`.
type Outcome<T = Reply> = std::result::Result<T, Reply>;

/// Longest command line accepted, terminator included.
const MAX_COMMAND_LINE: usize = 4096;

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line(Vec<u8>),
    TooLong,
    Eof,
}

/// Reads up to the next `\n`, never buffering more than `MAX_COMMAND_LINE`
/// bytes. An overlong line is consumed and dropped.
async fn read_command_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<LineRead> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_COMMAND_LINE as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.ends_with(b"\n") || n < MAX_COMMAND_LINE {
        return Ok(LineRead::Line(buf));
    }

    loop {
        buf.clear();
        let n = (&mut *reader)
            .take(MAX_COMMAND_LINE as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 || buf.ends_with(b"\n") {
            return Ok(LineRead::TooLong);
        }
    }
}

pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ServerContext>,
) -> Result<()> {
    stream.set_nodelay(true).map_err(SyncError::network)?;
    let local_ip = stream.local_addr().map_err(SyncError::network)?.ip();
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    Reply::new(220, context.options.banner.clone())
        .write_to(&mut writer)
        .await
        .map_err(SyncError::network)?;

    let mut session = Session::new(context.clone(), local_ip, peer);
    loop {
        let read = tokio::time::timeout(context.options.idle_timeout, read_command_line(&mut reader)).await;
        let bytes = match read {
            Err(_) => {
                tracing::info!(%peer, "Closing idle session");
                let _ = Reply::new(421, "Control connection timed out.")
                    .write_to(&mut writer)
                    .await;
                break;
            }
            Ok(Ok(LineRead::Eof)) => break,
            Ok(Ok(LineRead::Line(bytes))) => bytes,
            Ok(Ok(LineRead::TooLong)) => {
                tracing::warn!(%peer, "Dropped overlong command line");
                Reply::new(500, "Command line too long.")
                    .write_to(&mut writer)
                    .await
                    .map_err(SyncError::network)?;
                continue;
            }
            Ok(Err(e)) => return Err(SyncError::network(e)),
        };
        let Ok(line) = String::from_utf8(bytes) else {
            Reply::new(501, "Command line is not valid UTF-8.")
                .write_to(&mut writer)
                .await
                .map_err(SyncError::network)?;
            continue;
        };

        let (reply, quit) = match Command::parse(&line) {
            Ok(command) => {
                tracing::debug!(%peer, "<- {}", command.redacted());
                let quit = command == Command::Quit;
                (session.dispatch(command, &mut writer).await, quit)
            }
            Err(e) => (Reply::new(501, e.to_string()), false),
        };

        tracing::debug!(%peer, "-> {} {}", reply.code, reply.message());
        reply
            .write_to(&mut writer)
            .await
            .map_err(SyncError::network)?;
        if quit {
            break;
        }
    }

    tracing::info!(%peer, user = session.user_name(), "Session closed");
    Ok(())
}

struct Session {
    context: Arc<ServerContext>,
    local_ip: IpAddr,
    peer: SocketAddr,
    pending_user: Option<String>,
    account: Option<UserAccount>,
    fs: VirtualFs,
    rename_from: Option<ResolvedPath>,
    passive: Option<TcpListener>,
    transfer_type: TransferType,
}

impl Session {
    fn new(context: Arc<ServerContext>, local_ip: IpAddr, peer: SocketAddr) -> Self {
        Self {
            context,
            local_ip,
            peer,
            pending_user: None,
            account: None,
            fs: VirtualFs::new(std::path::PathBuf::new()),
            rename_from: None,
            passive: None,
            transfer_type: TransferType::default(),
        }
    }

    fn user_name(&self) -> &str {
        self.account.as_ref().map(|a| a.name.as_str()).unwrap_or("-")
    }

    async fn dispatch(&mut self, command: Command, writer: &mut OwnedWriteHalf) -> Reply {
        // RNTO must directly follow RNFR
        let rename_from = self.rename_from.take();

        let outcome = match command {
            Command::User(name) => Ok(self.user(name)),
            Command::Pass(password) => self.pass(&password),
            Command::Quit => Ok(Reply::new(221, "Goodbye.")),
            Command::Noop => Ok(Reply::new(200, "I successfully done nothin'.")),
            Command::Syst => Ok(Reply::new(215, "UNIX Type: L8")),
            Command::Feat => Ok(feat_reply()),
            Command::Opts(arg) => Ok(opts_reply(&arg)),
            Command::Unknown(verb) => Ok(Reply::new(
                500,
                format!("Command \"{}\" not understood.", verb),
            )),
            command if self.account.is_none() => {
                tracing::debug!(peer = %self.peer, "{} before login", command.verb());
                Err(Reply::new(530, "Log in with USER and PASS first."))
            }
            Command::Pwd => Ok(Reply::new(
                257,
                format!("\"{}\" is the current directory.", self.fs.cwd()),
            )),
            Command::Cwd(path) => self.cwd(&path).await,
            Command::Cdup => self.cwd("..").await,
            Command::Type(kind) => {
                self.transfer_type = kind;
                Ok(Reply::new(
                    200,
                    match kind {
                        TransferType::Ascii => "Type set to: ASCII.",
                        TransferType::Binary => "Type set to: Binary.",
                    },
                ))
            }
            Command::Pasv => self.pasv().await,
            Command::Epsv => self.epsv().await,
            Command::Stor(path) => self.store(&path, false, writer).await,
            Command::Appe(path) => self.store(&path, true, writer).await,
            Command::Retr(path) => self.retrieve(&path, writer).await,
            Command::Mkd(path) => self.mkd(&path).await,
            Command::Rmd(path) => self.rmd(&path).await,
            Command::Dele(path) => self.dele(&path).await,
            Command::Rnfr(path) => self.rnfr(&path).await,
            Command::Rnto(path) => self.rnto(rename_from, &path).await,
            Command::Size(path) => self.size(&path).await,
            Command::Mdtm(path) => self.mdtm(&path).await,
            Command::Xmd5(path) => self.xmd5(&path).await,
            Command::Mlsd(path) => self.listing(Listing::Mlsd, path, writer).await,
            Command::Nlst(path) => self.listing(Listing::Nlst, path, writer).await,
            Command::List(path) => self.listing(Listing::List, path, writer).await,
        };

        match outcome {
            Ok(reply) | Err(reply) => reply,
        }
    }

    fn user(&mut self, name: String) -> Reply {
        if self.account.is_some() {
            tracing::info!(peer = %self.peer, "User {} logging in again as {}", self.user_name(), name);
            self.account = None;
        }
        self.pending_user = Some(name);
        Reply::new(331, "Username ok, send password.")
    }

    fn pass(&mut self, password: &str) -> Outcome {
        let name = self
            .pending_user
            .take()
            .ok_or_else(|| Reply::new(503, "Login with USER first."))?;

        match self.context.authorizer.authenticate(&name, password) {
            Some(account) => {
                tracing::info!(peer = %self.peer, user = %name, "User logged in");
                self.fs = VirtualFs::new(account.home.clone());
                self.account = Some(account.clone());
                Ok(Reply::new(230, "Login successful."))
            }
            None => {
                tracing::warn!(peer = %self.peer, user = %name, "Authentication failed");
                Err(Reply::new(530, "Authentication failed."))
            }
        }
    }

    fn require(&self, perm: Perm) -> Outcome<()> {
        match &self.account {
            Some(account) if account.perms.allows(perm) => Ok(()),
            _ => Err(Reply::new(550, "Permission denied.")),
        }
    }

    fn resolve(&self, arg: &str) -> Outcome<ResolvedPath> {
        self.fs.resolve(arg).map_err(|e| {
            tracing::warn!(peer = %self.peer, "Rejected path {:?}: {}", arg, e);
            Reply::new(553, "Requested action not taken. File name not allowed.")
        })
    }

    async fn cwd(&mut self, arg: &str) -> Outcome {
        self.require(Perm::ChangeDir)?;
        let target = self.resolve(arg)?;
        let meta = tokio::fs::metadata(&target.real).await.map_err(fs_error)?;
        if !meta.is_dir() {
            return Err(Reply::new(550, "Not a directory."));
        }
        self.fs.set_cwd(&target);
        Ok(Reply::new(
            250,
            format!("\"{}\" is the current directory.", target.virtual_path),
        ))
    }

    async fn bind_passive(&mut self) -> Outcome<SocketAddr> {
        let listener = TcpListener::bind(SocketAddr::new(self.local_ip, 0))
            .await
            .map_err(|e| {
                tracing::error!("Failed to bind passive listener: {}", e);
                Reply::new(425, "Can't open data connection.")
            })?;
        let addr = listener
            .local_addr()
            .map_err(|_| Reply::new(425, "Can't open data connection."))?;
        self.passive = Some(listener);
        Ok(addr)
    }

    async fn pasv(&mut self) -> Outcome {
        let IpAddr::V4(ip) = self.local_ip else {
            return Err(Reply::new(425, "PASV requires IPv4; use EPSV."));
        };
        let addr = self.bind_passive().await?;
        Ok(Reply::new(227, format_pasv(SocketAddrV4::new(ip, addr.port()))))
    }

    async fn epsv(&mut self) -> Outcome {
        let addr = self.bind_passive().await?;
        Ok(Reply::new(229, format_epsv(addr.port())))
    }

    /// Sends 150 and accepts the client's data connection on the passive listener.
    async fn open_data(&mut self, writer: &mut OwnedWriteHalf) -> Outcome<TcpStream> {
        let listener = self
            .passive
            .take()
            .ok_or_else(|| Reply::new(425, "Use PASV or EPSV first."))?;

        Reply::new(150, "File status okay. About to open data connection.")
            .write_to(writer)
            .await
            .map_err(|_| Reply::new(426, "Connection closed; transfer aborted."))?;

        match tokio::time::timeout(self.context.options.data_timeout, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                if addr.ip() != self.peer.ip() {
                    tracing::warn!(peer = %self.peer, "Data connection from foreign address {}", addr);
                    return Err(Reply::new(425, "Rejected data connection from foreign address."));
                }
                Ok(stream)
            }
            Ok(Err(e)) => {
                tracing::warn!(peer = %self.peer, "Data connection failed: {}", e);
                Err(Reply::new(425, "Can't open data connection."))
            }
            Err(_) => Err(Reply::new(425, "Data connection timed out.")),
        }
    }

    async fn store(&mut self, arg: &str, append: bool, writer: &mut OwnedWriteHalf) -> Outcome {
        self.require(if append { Perm::Append } else { Perm::Write })?;
        let target = self.resolve(arg)?;
        if tokio::fs::metadata(&target.real)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(Reply::new(550, "Is a directory."));
        }
        // Leave the target untouched when no transfer can happen
        if self.passive.is_none() {
            return Err(Reply::new(425, "Use PASV or EPSV first."));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(&target.real)
            .await
            .map_err(fs_error)?;

        let mut data = self.open_data(writer).await?;
        let copied = tokio::io::copy(&mut data, &mut file).await;
        let flushed = file.flush().await;
        match (copied, flushed) {
            (Ok(bytes), Ok(())) => {
                tracing::info!(
                    peer = %self.peer,
                    user = self.user_name(),
                    "{} {} ({} bytes)",
                    if append { "APPE" } else { "STOR" },
                    target.virtual_path,
                    bytes
                );
                Ok(Reply::new(226, "Transfer complete."))
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(peer = %self.peer, "Upload of {} failed: {}", target.virtual_path, e);
                Err(Reply::new(426, "Connection closed; transfer aborted."))
            }
        }
    }

    async fn retrieve(&mut self, arg: &str, writer: &mut OwnedWriteHalf) -> Outcome {
        self.require(Perm::Read)?;
        let target = self.resolve(arg)?;
        let mut file = tokio::fs::File::open(&target.real).await.map_err(fs_error)?;
        if file.metadata().await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(Reply::new(550, "Is a directory."));
        }

        let mut data = self.open_data(writer).await?;
        let copied = tokio::io::copy(&mut file, &mut data).await;
        let closed = data.shutdown().await;
        match (copied, closed) {
            (Ok(bytes), Ok(())) => {
                tracing::info!(
                    peer = %self.peer,
                    mode = ?self.transfer_type,
                    "RETR {} ({} bytes)",
                    target.virtual_path,
                    bytes
                );
                Ok(Reply::new(226, "Transfer complete."))
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(peer = %self.peer, "Download of {} failed: {}", target.virtual_path, e);
                Err(Reply::new(426, "Connection closed; transfer aborted."))
            }
        }
    }

    async fn mkd(&mut self, arg: &str) -> Outcome {
        self.require(Perm::MakeDir)?;
        let target = self.resolve(arg)?;
        tokio::fs::create_dir(&target.real).await.map_err(fs_error)?;
        tracing::info!(peer = %self.peer, "MKD {}", target.virtual_path);
        Ok(Reply::new(
            257,
            format!("\"{}\" directory created.", target.virtual_path.replace('"', "\"\"")),
        ))
    }

    async fn rmd(&mut self, arg: &str) -> Outcome {
        self.require(Perm::Delete)?;
        let target = self.resolve(arg)?;
        if target.is_root() {
            return Err(Reply::new(550, "Can't remove root directory."));
        }
        tokio::fs::remove_dir(&target.real).await.map_err(fs_error)?;
        tracing::info!(peer = %self.peer, "RMD {}", target.virtual_path);
        Ok(Reply::new(250, "Directory removed."))
    }

    async fn dele(&mut self, arg: &str) -> Outcome {
        self.require(Perm::Delete)?;
        let target = self.resolve(arg)?;
        let meta = tokio::fs::symlink_metadata(&target.real).await.map_err(fs_error)?;
        if meta.is_dir() {
            return Err(Reply::new(550, "Is a directory."));
        }
        tokio::fs::remove_file(&target.real).await.map_err(fs_error)?;
        tracing::info!(peer = %self.peer, "DELE {}", target.virtual_path);
        Ok(Reply::new(250, "File removed."))
    }

    async fn rnfr(&mut self, arg: &str) -> Outcome {
        self.require(Perm::Rename)?;
        let source = self.resolve(arg)?;
        if source.is_root() {
            return Err(Reply::new(550, "Can't rename home directory."));
        }
        tokio::fs::symlink_metadata(&source.real).await.map_err(fs_error)?;
        self.rename_from = Some(source);
        Ok(Reply::new(350, "Ready for destination name."))
    }

    async fn rnto(&mut self, source: Option<ResolvedPath>, arg: &str) -> Outcome {
        self.require(Perm::Rename)?;
        let source =
            source.ok_or_else(|| Reply::new(503, "Bad sequence of commands: use RNFR first."))?;
        let target = self.resolve(arg)?;
        if target.is_root() {
            return Err(Reply::new(553, "Can't overwrite home directory."));
        }
        tokio::fs::rename(&source.real, &target.real)
            .await
            .map_err(fs_error)?;
        tracing::info!(peer = %self.peer, "RNFR {} RNTO {}", source.virtual_path, target.virtual_path);
        Ok(Reply::new(250, "Renaming ok."))
    }

    async fn file_metadata(&self, arg: &str) -> Outcome<(ResolvedPath, std::fs::Metadata)> {
        let target = self.resolve(arg)?;
        let meta = tokio::fs::metadata(&target.real).await.map_err(fs_error)?;
        if meta.is_dir() {
            return Err(Reply::new(550, format!("{} is not retrievable.", target.virtual_path)));
        }
        Ok((target, meta))
    }

    async fn size(&mut self, arg: &str) -> Outcome {
        self.require(Perm::List)?;
        let (_, meta) = self.file_metadata(arg).await?;
        Ok(Reply::new(213, meta.len().to_string()))
    }

    async fn mdtm(&mut self, arg: &str) -> Outcome {
        self.require(Perm::List)?;
        let (_, meta) = self.file_metadata(arg).await?;
        let modified = meta.modified().map_err(fs_error)?;
        Ok(Reply::new(213, format_timestamp(DateTime::<Utc>::from(modified))))
    }

    async fn xmd5(&mut self, arg: &str) -> Outcome {
        self.require(Perm::Read)?;
        let (target, _) = self.file_metadata(arg).await?;
        let hash = file_md5_async(&target.real).await.map_err(fs_error)?;
        Ok(Reply::new(251, hash))
    }

    async fn listing(
        &mut self,
        kind: Listing,
        arg: Option<String>,
        writer: &mut OwnedWriteHalf,
    ) -> Outcome {
        self.require(Perm::List)?;
        let target = self.resolve(arg.as_deref().unwrap_or(""))?;
        let meta = tokio::fs::metadata(&target.real).await.map_err(fs_error)?;

        let entries = if meta.is_dir() {
            list_entries(&target.real).await.map_err(fs_error)?
        } else if kind == Listing::Mlsd {
            return Err(Reply::new(501, "No such directory."));
        } else {
            let name = target.virtual_path.rsplit('/').next().unwrap_or_default().to_string();
            vec![RemoteEntry {
                name,
                kind: EntryKind::File,
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            }]
        };

        let mut body = String::new();
        for entry in &entries {
            match kind {
                Listing::Mlsd => body.push_str(&format_mlsd_line(entry)),
                Listing::Nlst => body.push_str(&entry.name),
                Listing::List => body.push_str(&format_list_line(entry)),
            }
            body.push_str("\r\n");
        }

        let mut data = self.open_data(writer).await?;
        let sent = data.write_all(body.as_bytes()).await;
        let closed = data.shutdown().await;
        match (sent, closed) {
            (Ok(()), Ok(())) => Ok(Reply::new(226, "Transfer complete.")),
            _ => Err(Reply::new(426, "Connection closed; transfer aborted.")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listing {
    Mlsd,
    Nlst,
    List,
}

fn feat_reply() -> Reply {
    let features = ["EPSV", "MDTM", "MLSD", "PASV", "SIZE", "TYPE A;I", "UTF8", "XMD5"];
    let mut lines = vec!["Features supported:".to_string()];
    lines.extend(features.iter().map(|f| format!(" {}", f)));
    lines.push("End FEAT.".to_string());
    Reply::multiline(211, lines)
}

fn opts_reply(arg: &str) -> Reply {
    let upper = arg.to_ascii_uppercase();
    if upper == "UTF8 ON" || upper == "UTF8" {
        Reply::new(200, "Always in UTF8 mode.")
    } else if upper.starts_with("MLST") {
        Reply::new(200, "MLST OPTS type;size;modify;")
    } else {
        Reply::new(501, "Invalid argument.")
    }
}

fn fs_error(e: std::io::Error) -> Reply {
    let text = match e.kind() {
        ErrorKind::NotFound => "No such file or directory.".to_string(),
        ErrorKind::AlreadyExists => "File exists.".to_string(),
        ErrorKind::PermissionDenied => "Permission denied.".to_string(),
        ErrorKind::DirectoryNotEmpty => "Directory not empty.".to_string(),
        _ => e.to_string(),
    };
    Reply::new(550, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_lines_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"US")
            .read(b"ER user\r\nNO")
            .read(b"OP\r\n")
            .build();
        let mut reader = BufReader::new(mock);

        assert_eq!(
            read_command_line(&mut reader).await.unwrap(),
            LineRead::Line(b"USER user\r\n".to_vec())
        );
        assert_eq!(
            read_command_line(&mut reader).await.unwrap(),
            LineRead::Line(b"NOOP\r\n".to_vec())
        );
        assert_eq!(read_command_line(&mut reader).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn test_overlong_line_is_dropped_whole() {
        let mut wire = vec![b'A'; MAX_COMMAND_LINE * 3];
        wire.extend_from_slice(b"\r\nNOOP\r\n");
        let mut reader = BufReader::new(&wire[..]);

        assert_eq!(read_command_line(&mut reader).await.unwrap(), LineRead::TooLong);
        assert_eq!(
            read_command_line(&mut reader).await.unwrap(),
            LineRead::Line(b"NOOP\r\n".to_vec())
        );
    }

    #[tokio::test]
    async fn test_line_at_the_limit_is_accepted() {
        let mut wire = vec![b'A'; MAX_COMMAND_LINE - 2];
        wire.extend_from_slice(b"\r\n");
        let mut reader = BufReader::new(&wire[..]);

        match read_command_line(&mut reader).await.unwrap() {
            LineRead::Line(line) => assert_eq!(line.len(), MAX_COMMAND_LINE),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unterminated_line_before_eof() {
        let mut reader = BufReader::new(&b"QUIT"[..]);
        assert_eq!(
            read_command_line(&mut reader).await.unwrap(),
            LineRead::Line(b"QUIT".to_vec())
        );
    }

    #[test]
    fn test_fs_error_maps_to_550() {
        let reply = fs_error(std::io::Error::from(ErrorKind::NotFound));
        assert_eq!(reply.code, 550);
        assert_eq!(reply.message(), "No such file or directory.");
    }
}
