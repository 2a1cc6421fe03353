//! FTP wire types shared by the server and the client.

pub mod command;
pub mod listing;
pub mod reply;

pub use command::{Command, TransferType};
pub use reply::Reply;

use crate::utils::error::{Result, SyncError};
use regex::Regex;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::OnceLock;

pub fn format_pasv(addr: SocketAddrV4) -> String {
    let [a, b, c, d] = addr.ip().octets();
    let port = addr.port();
    format!(
        "Entering Passive Mode ({},{},{},{},{},{}).",
        a,
        b,
        c,
        d,
        port >> 8,
        port & 0xff
    )
}

/// Extracts the data address from a 227 reply text. Parentheses are optional.
pub fn parse_pasv(text: &str) -> Result<SocketAddrV4> {
    static PASV: OnceLock<Regex> = OnceLock::new();
    let re = PASV.get_or_init(|| {
        Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})")
            .expect("static regex")
    });

    let caps = re
        .captures(text)
        .ok_or_else(|| SyncError::protocol(format!("bad PASV reply: {}", text)))?;
    let mut nums = [0u8; 6];
    for (i, slot) in nums.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse()
            .map_err(|_| SyncError::protocol(format!("bad PASV reply: {}", text)))?;
    }
    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = (u16::from(nums[4]) << 8) | u16::from(nums[5]);
    Ok(SocketAddrV4::new(ip, port))
}

pub fn format_epsv(port: u16) -> String {
    format!("Entering Extended Passive Mode (|||{}|)", port)
}

pub fn parse_epsv(text: &str) -> Result<u16> {
    let start = text
        .find("(|||")
        .ok_or_else(|| SyncError::protocol(format!("bad EPSV reply: {}", text)))?;
    text[start + 4..]
        .split('|')
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| SyncError::protocol(format!("bad EPSV reply: {}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pasv_address() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 50123);
        let text = format_pasv(addr);
        assert_eq!(text, "Entering Passive Mode (127,0,0,1,195,203).");
        assert_eq!(parse_pasv(&text).unwrap(), addr);
        assert_eq!(parse_pasv("=10,0,0,2,4,1").unwrap().port(), 1025);
        assert!(parse_pasv("Entering Passive Mode").is_err());
        assert!(parse_pasv("(300,0,0,1,1,1)").is_err());
    }

    #[test]
    fn test_epsv_port() {
        assert_eq!(parse_epsv(&format_epsv(40000)).unwrap(), 40000);
        assert!(parse_epsv("Entering Extended Passive Mode").is_err());
    }
}
