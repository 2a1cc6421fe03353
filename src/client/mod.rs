//! Minimal async FTP client: passive mode, binary transfers.

use crate::domain::model::RemoteEntry;
use crate::protocol::listing::parse_mlsd_line;
use crate::protocol::{parse_pasv, Command, Reply, TransferType};
use crate::utils::error::{Result, SyncError};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct FtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    timeout: Duration,
    welcome: String,
}

impl FtpClient {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with_timeout(host, port, DEFAULT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let peer = lookup_host((host, port))
            .await
            .map_err(SyncError::network)?
            .next()
            .ok_or_else(|| SyncError::ConfigError {
                message: format!("could not resolve host '{}'", host),
            })?;

        let stream = tokio::time::timeout(timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| SyncError::timeout(format!("connecting to {}", peer)))?
            .map_err(SyncError::network)?;
        stream.set_nodelay(true).map_err(SyncError::network)?;

        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
            peer,
            timeout,
            welcome: String::new(),
        };

        let greeting = client.read_reply().await?;
        let greeting = expect(greeting, &[220])?;
        client.welcome = greeting.message();
        tracing::debug!("Connected to {}: {}", peer, client.welcome);
        Ok(client)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn welcome(&self) -> &str {
        &self.welcome
    }

    async fn send(&mut self, command: &Command) -> Result<()> {
        tracing::trace!("-> {}", command.redacted());
        let line = format!("{}\r\n", command);
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(SyncError::network)?;
        self.writer.flush().await.map_err(SyncError::network)
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let reply = tokio::time::timeout(self.timeout, Reply::read_from(&mut self.reader))
            .await
            .map_err(|_| SyncError::timeout("waiting for server reply"))??;
        tracing::trace!("<- {} {}", reply.code, reply.message());
        if reply.code == 421 {
            return Err(SyncError::ConnectionClosed);
        }
        Ok(reply)
    }

    async fn execute(&mut self, command: Command, codes: &[u16]) -> Result<Reply> {
        self.send(&command).await?;
        let reply = self.read_reply().await?;
        expect(reply, codes)
    }

    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        self.send(&Command::User(user.to_string())).await?;
        let reply = self.read_reply().await?;
        match reply.code {
            230 => {}
            331 => {
                self.execute(Command::Pass(password.to_string()), &[230, 202])
                    .await?;
            }
            _ => return Err(reply_error(reply)),
        }
        self.execute(Command::Type(TransferType::Binary), &[200])
            .await?;
        tracing::debug!("Logged in as {}", user);
        Ok(())
    }

    pub async fn noop(&mut self) -> Result<()> {
        self.execute(Command::Noop, &[200]).await.map(|_| ())
    }

    pub async fn pwd(&mut self) -> Result<String> {
        let reply = self.execute(Command::Pwd, &[257]).await?;
        let text = reply.message();
        quoted_path(&text).ok_or_else(|| SyncError::protocol(format!("bad PWD reply: {}", text)))
    }

    pub async fn cwd(&mut self, path: &str) -> Result<()> {
        self.execute(Command::Cwd(path.to_string()), &[250])
            .await
            .map(|_| ())
    }

    pub async fn mkd(&mut self, path: &str) -> Result<()> {
        self.execute(Command::Mkd(path.to_string()), &[257])
            .await
            .map(|_| ())
    }

    pub async fn rmd(&mut self, path: &str) -> Result<()> {
        self.execute(Command::Rmd(path.to_string()), &[250])
            .await
            .map(|_| ())
    }

    pub async fn dele(&mut self, path: &str) -> Result<()> {
        self.execute(Command::Dele(path.to_string()), &[250])
            .await
            .map(|_| ())
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.execute(Command::Rnfr(from.to_string()), &[350])
            .await?;
        self.execute(Command::Rnto(to.to_string()), &[250])
            .await
            .map(|_| ())
    }

    pub async fn size(&mut self, path: &str) -> Result<u64> {
        let reply = self.execute(Command::Size(path.to_string()), &[213]).await?;
        reply
            .message()
            .trim()
            .parse()
            .map_err(|_| SyncError::protocol(format!("bad SIZE reply: {}", reply.message())))
    }

    /// Server-side md5 via the XMD5 extension.
    pub async fn md5(&mut self, path: &str) -> Result<String> {
        let reply = self.execute(Command::Xmd5(path.to_string()), &[251]).await?;
        let text = reply.message();
        text.split_whitespace()
            .last()
            .map(|h| h.to_ascii_lowercase())
            .ok_or_else(|| SyncError::protocol(format!("bad XMD5 reply: {}", text)))
    }

    async fn open_passive(&mut self) -> Result<TcpStream> {
        let reply = self.execute(Command::Pasv, &[227]).await?;
        let advertised = parse_pasv(&reply.message())?;
        // Only the port is trusted; servers behind NAT advertise unroutable addresses
        let addr = SocketAddr::new(self.peer.ip(), advertised.port());

        tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SyncError::timeout(format!("opening data connection to {}", addr)))?
            .map_err(SyncError::network)
    }

    /// Uploads everything `source` yields to `path`. Returns the byte count.
    pub async fn store<R>(&mut self, path: &str, source: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut data = self.open_passive().await?;
        self.execute(Command::Stor(path.to_string()), &[125, 150])
            .await?;
        let bytes = tokio::io::copy(source, &mut data)
            .await
            .map_err(SyncError::network)?;
        data.shutdown().await.map_err(SyncError::network)?;
        drop(data);
        expect(self.read_reply().await?, &[226, 250])?;
        Ok(bytes)
    }

    pub async fn store_file(&mut self, path: &str, local: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::open(local).await?;
        self.store(path, &mut file).await
    }

    pub async fn retrieve(&mut self, path: &str) -> Result<Vec<u8>> {
        let mut data = self.open_passive().await?;
        self.execute(Command::Retr(path.to_string()), &[125, 150])
            .await?;
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)
            .await
            .map_err(SyncError::network)?;
        drop(data);
        expect(self.read_reply().await?, &[226, 250])?;
        Ok(buf)
    }

    /// Machine-readable listing (MLSD) of a directory.
    pub async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let arg = (!path.is_empty()).then(|| path.to_string());
        let mut data = self.open_passive().await?;
        self.execute(Command::Mlsd(arg), &[125, 150]).await?;
        let mut body = String::new();
        data.read_to_string(&mut body)
            .await
            .map_err(SyncError::network)?;
        drop(data);
        expect(self.read_reply().await?, &[226, 250])?;
        Ok(body.lines().filter_map(parse_mlsd_line).collect())
    }

    pub async fn quit(mut self) -> Result<()> {
        self.execute(Command::Quit, &[221]).await.map(|_| ())
    }
}

fn expect(reply: Reply, codes: &[u16]) -> Result<Reply> {
    if codes.contains(&reply.code) {
        Ok(reply)
    } else {
        Err(reply_error(reply))
    }
}

fn reply_error(reply: Reply) -> SyncError {
    SyncError::FtpError {
        code: reply.code,
        message: reply.message(),
    }
}

/// Extracts `/a/b` from `"/a/b" is the current directory`; `""` escapes a quote.
fn quoted_path(text: &str) -> Option<String> {
    let start = text.find('"')? + 1;
    let mut out = String::new();
    let mut chars = text[start..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                out.push('"');
            } else {
                return Some(out);
            }
        } else {
            out.push(c);
        }
    }
    None
}
