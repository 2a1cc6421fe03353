use crate::utils::error::{Result, SyncError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const MAX_REPLY_LINES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    pub fn is_permanent_failure(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Text of the reply without codes; continuation lines are joined with `\n`.
    pub fn message(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_wire(&self) -> String {
        match self.lines.as_slice() {
            [] => format!("{} \r\n", self.code),
            [only] => format!("{} {}\r\n", self.code, only),
            [first, middle @ .., last] => {
                let mut out = format!("{}-{}\r\n", self.code, first);
                for line in middle {
                    out.push_str(line);
                    out.push_str("\r\n");
                }
                out.push_str(&format!("{} {}\r\n", self.code, last));
                out
            }
        }
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.to_wire().as_bytes()).await?;
        writer.flush().await
    }

    /// Reads one (possibly multi-line) reply from the control connection.
    pub async fn read_from<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Reply> {
        let first = read_line(reader).await?;
        let (code, sep, text) = split_status_line(&first)
            .ok_or_else(|| SyncError::protocol(format!("malformed reply line: {:?}", first)))?;

        let mut lines = vec![text.to_string()];
        if sep == '-' {
            let terminator = format!("{} ", code);
            loop {
                let line = read_line(reader).await?;
                if let Some(last) = line.strip_prefix(&terminator) {
                    lines.push(last.to_string());
                    break;
                }
                if line == code.to_string() {
                    lines.push(String::new());
                    break;
                }
                lines.push(line);
                if lines.len() > MAX_REPLY_LINES {
                    return Err(SyncError::protocol("multi-line reply too long"));
                }
            }
        }

        Ok(Reply { code, lines })
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut buf = String::new();
    let n = reader.read_line(&mut buf).await.map_err(SyncError::network)?;
    if n == 0 {
        return Err(SyncError::ConnectionClosed);
    }
    Ok(buf.trim_end_matches(['\r', '\n']).to_string())
}

fn split_status_line(line: &str) -> Option<(u16, char, &str)> {
    if line.len() < 3 || !line.is_char_boundary(3) {
        return None;
    }
    let code: u16 = line[..3].parse().ok()?;
    if !(100..600).contains(&code) {
        return None;
    }
    let rest = &line[3..];
    match rest.chars().next() {
        None => Some((code, ' ', "")),
        Some(sep @ (' ' | '-')) => Some((code, sep, &rest[1..])),
        Some(_) => None,
    }
}
