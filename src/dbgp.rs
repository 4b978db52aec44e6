//! The DBGp wire codec. Engine -> IDE packets carry a decimal length
//! prefix, a NUL, the XML declaration plus payload, and a trailing NUL.
//! IDE -> engine commands are bare NUL-terminated lines of the shape
//! `command -key value -key value`.

use crate::util::find;
use std::collections::HashMap;
use std::io::{self, BufRead};

pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"iso-8859-1\"?>\n";

/// Frame an XML payload for transmission to the IDE.
pub fn construct_dbgp_packet(payload: &str) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::with_capacity(payload.len() + XML_DECLARATION.len() + 16);
    buf.extend_from_slice((payload.len() + XML_DECLARATION.len()).to_string().as_bytes());
    buf.push(0);
    buf.extend_from_slice(XML_DECLARATION.as_bytes());
    buf.extend_from_slice(payload.as_bytes());
    buf.push(0);
    buf
}

/// Read one `<len>\0<data>\0` frame. Returns None on a clean EOF before any
/// byte of a new frame; everything else malformed is an error.
pub fn read_dbgp_frame<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf: Vec<u8> = Vec::new();
    let n = reader.read_until(0, &mut len_buf)?;
    if n == 0 {
        return Ok(None);
    }
    if len_buf.last() != Some(&0) {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "length prefix not NUL terminated",
        ));
    }
    len_buf.pop();

    let len_str = std::str::from_utf8(&len_buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let data_len = len_str
        .parse::<usize>()
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad length prefix {:?}", len_str),
            )
        })?;

    let mut data = vec![0u8; data_len + 1];
    reader.read_exact(&mut data)?;
    if data.pop() != Some(0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame data not NUL terminated",
        ));
    }
    if find(&data, &[0]).is_some() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "stray NUL inside frame data",
        ));
    }

    Ok(Some(data))
}

/// One parsed IDE command.
#[derive(Debug, Clone)]
pub struct DbgpCommand {
    /// Only the command name, e.g. `stack_get`.
    pub command: String,
    /// The command line exactly as received, for pass-through handlers.
    pub full_command: String,
    pub options: HashMap<String, String>,
    pub sequence: i64,
}

impl DbgpCommand {
    /// Space-tokenised `command -key value ...` parse. The `-i <seq>`
    /// option is mandatory; key tokens must carry their `-`.
    pub fn parse(full_command: &str) -> io::Result<DbgpCommand> {
        let mut components = full_command.split_whitespace();
        let command = match components.next() {
            Some(c) => c.to_owned(),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "empty dbgp command",
                ))
            }
        };

        let mut options: HashMap<String, String> = HashMap::new();
        loop {
            let key = match components.next() {
                Some(k) => k,
                None => break,
            };
            if !key.starts_with('-') || key.len() < 2 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected an option, got {:?} in {:?}", key, full_command),
                ));
            }
            let value = match components.next() {
                Some(v) => v,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("option {:?} has no value in {:?}", key, full_command),
                    ))
                }
            };
            options.insert(key[1..].to_owned(), value.to_owned());
        }

        let sequence = match options.get("i") {
            Some(seq) => seq
                .parse::<i64>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("no sequence number (-i) in {:?}", full_command),
                ))
            }
        };

        Ok(DbgpCommand {
            command,
            full_command: full_command.to_owned(),
            options,
            sequence,
        })
    }
}

/// Sequence numbers from the IDE must strictly increase.
pub fn check_sequence(last_sequence_num: &mut i64, sequence: i64) -> io::Result<()> {
    if sequence <= *last_sequence_num {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "sequence number {} is not greater than the last seen ({})",
                sequence, last_sequence_num
            ),
        ));
    }
    *last_sequence_num = sequence;
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::dbgp::{
        check_sequence, construct_dbgp_packet, read_dbgp_frame, DbgpCommand, XML_DECLARATION,
    };
    use std::io::Cursor;

    #[test]
    fn framing_round_trip() {
        let payload = "<response command=\"status\"></response>";
        let packet = construct_dbgp_packet(payload);

        // Length prefix covers the xml declaration plus payload.
        let nul = packet.iter().position(|&b| b == 0).unwrap();
        let prefix: usize = std::str::from_utf8(&packet[..nul]).unwrap().parse().unwrap();
        assert_eq!(prefix, XML_DECLARATION.len() + payload.len());

        let mut cursor = Cursor::new(packet);
        let frame = read_dbgp_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(frame, format!("{}{}", XML_DECLARATION, payload).into_bytes());

        // Clean EOF after the frame.
        assert!(read_dbgp_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn bad_frames_are_errors() {
        // No NUL after the length prefix.
        let mut c = Cursor::new(b"17".to_vec());
        assert!(read_dbgp_frame(&mut c).unwrap_err().kind() == std::io::ErrorKind::UnexpectedEof);

        // Non-numeric length.
        let mut c = Cursor::new(b"xyz\0data\0".to_vec());
        assert!(read_dbgp_frame(&mut c).is_err());

        // Truncated data.
        let mut c = Cursor::new(b"10\0abc".to_vec());
        assert!(read_dbgp_frame(&mut c).is_err());

        // Missing trailing NUL.
        let mut c = Cursor::new(b"3\0abcX".to_vec());
        assert!(read_dbgp_frame(&mut c).is_err());
    }

    #[test]
    fn parses_feature_set_command() {
        let cmd = DbgpCommand::parse("feature_set -i 7 -n max_depth -v 5").unwrap();
        assert_eq!(cmd.command, "feature_set");
        assert_eq!(cmd.sequence, 7);
        assert_eq!(cmd.options["n"], "max_depth");
        assert_eq!(cmd.options["v"], "5");
        assert_eq!(cmd.full_command, "feature_set -i 7 -n max_depth -v 5");
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(DbgpCommand::parse("").is_err());
        // No sequence number at all.
        assert!(DbgpCommand::parse("status").is_err());
        // Option with no value.
        assert!(DbgpCommand::parse("status -i").is_err());
        // Stray non-option token.
        assert!(DbgpCommand::parse("status x -i 3").is_err());
        // Non-numeric sequence.
        assert!(DbgpCommand::parse("status -i seven").is_err());
    }

    #[test]
    fn sequence_must_strictly_increase() {
        let mut last = 0i64;
        assert!(check_sequence(&mut last, 1).is_ok());
        assert!(check_sequence(&mut last, 2).is_ok());
        // Gaps are fine, going backwards or repeating is not.
        assert!(check_sequence(&mut last, 4).is_ok());
        assert!(check_sequence(&mut last, 4).is_err());
        assert!(check_sequence(&mut last, 3).is_err());
    }
}
