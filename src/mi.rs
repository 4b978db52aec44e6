//! Synchronous gdb/MI driver. One command goes down the pipe, records come
//! back until the matching result record; execution commands additionally
//! wait for the `*stopped` notification. Nothing here is asynchronous on
//! purpose: the debug engine wants gdb halted whenever it is thinking.

use crate::flags::Flags;
use serde::Serialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MiValue {
    Const(String),
    Tuple(HashMap<String, MiValue>),
    List(Vec<MiValue>),
}

impl MiValue {
    pub fn get(&self, key: &str) -> Option<&MiValue> {
        match self {
            MiValue::Tuple(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }
}

/// A result or async record: the class word plus the attached results.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MiRecord {
    pub class: String,
    pub payload: HashMap<String, MiValue>,
}

impl MiRecord {
    /// `payload[key]` as a string constant.
    pub fn payload_const(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(MiValue::as_const)
    }
}

enum MiOutput {
    Result(MiRecord),
    ExecAsync(MiRecord),
    NotifyAsync(MiRecord),
    StatusAsync(MiRecord),
    Stream(char, String),
    Prompt,
}

fn bad_data<E>(e: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn parse_mi_output_line(line: &str) -> io::Result<MiOutput> {
    let trimmed = line.trim_end_matches(|c| c == '\r' || c == '\n');
    if trimmed == "(gdb)" || trimmed == "(gdb) " {
        return Ok(MiOutput::Prompt);
    }

    // An optional numeric token may precede the marker; we never send
    // tokens but gdb is allowed to echo them.
    let rest = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut chars = rest.chars();
    let marker = chars
        .next()
        .ok_or_else(|| bad_data(format!("empty gdb/mi record {:?}", line)))?;
    let body = chars.as_str();

    match marker {
        '^' => Ok(MiOutput::Result(parse_mi_record(body)?)),
        '*' => Ok(MiOutput::ExecAsync(parse_mi_record(body)?)),
        '=' => Ok(MiOutput::NotifyAsync(parse_mi_record(body)?)),
        '+' => Ok(MiOutput::StatusAsync(parse_mi_record(body)?)),
        '~' | '@' | '&' => {
            let mut cursor = Cursor::new(body);
            let text = cursor.parse_cstring()?;
            Ok(MiOutput::Stream(marker, text))
        }
        _ => Err(bad_data(format!("unrecognised gdb/mi record {:?}", line))),
    }
}

/// Parse `class[,name=value]*`.
fn parse_mi_record(body: &str) -> io::Result<MiRecord> {
    let mut cursor = Cursor::new(body);
    let class = cursor.parse_name();
    if class.is_empty() {
        return Err(bad_data(format!("gdb/mi record without a class: {:?}", body)));
    }

    let mut payload: HashMap<String, MiValue> = HashMap::new();
    while cursor.peek() == Some(b',') {
        cursor.bump();
        let name = cursor.parse_name();
        cursor.expect(b'=')?;
        let value = cursor.parse_value()?;
        payload.insert(name, value);
    }
    if cursor.peek().is_some() {
        return Err(bad_data(format!("trailing junk in gdb/mi record {:?}", body)));
    }

    Ok(MiRecord { class, payload })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Cursor<'a> {
        Cursor {
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn expect(&mut self, expected: u8) -> io::Result<()> {
        match self.bump() {
            Some(b) if b == expected => Ok(()),
            other => Err(bad_data(format!(
                "expected {:?} in gdb/mi output, got {:?}",
                expected as char, other
            ))),
        }
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn parse_value(&mut self) -> io::Result<MiValue> {
        match self.peek() {
            Some(b'"') => Ok(MiValue::Const(self.parse_cstring()?)),
            Some(b'{') => self.parse_tuple(),
            Some(b'[') => self.parse_list(),
            other => Err(bad_data(format!("expected a gdb/mi value, got {:?}", other))),
        }
    }

    fn parse_cstring(&mut self) -> io::Result<String> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(b'"') => return Ok(out),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'r') => out.push('\r'),
                    Some(other) => {
                        // Pass unknown escapes through untouched.
                        out.push('\\');
                        out.push(other as char);
                    }
                    None => return Err(bad_data("unterminated escape in gdb/mi string")),
                },
                Some(other) => out.push(other as char),
                None => return Err(bad_data("unterminated gdb/mi string")),
            }
        }
    }

    fn parse_tuple(&mut self) -> io::Result<MiValue> {
        self.expect(b'{')?;
        let mut map: HashMap<String, MiValue> = HashMap::new();
        if self.peek() == Some(b'}') {
            self.bump();
            return Ok(MiValue::Tuple(map));
        }
        loop {
            let name = self.parse_name();
            self.expect(b'=')?;
            let value = self.parse_value()?;
            map.insert(name, value);
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => return Ok(MiValue::Tuple(map)),
                other => return Err(bad_data(format!("bad gdb/mi tuple separator {:?}", other))),
            }
        }
    }

    fn parse_list(&mut self) -> io::Result<MiValue> {
        self.expect(b'[')?;
        let mut items: Vec<MiValue> = Vec::new();
        if self.peek() == Some(b']') {
            self.bump();
            return Ok(MiValue::List(items));
        }
        loop {
            // List elements are either plain values or `name=value` results;
            // a named element is kept as a single-entry tuple.
            match self.peek() {
                Some(b'"') | Some(b'{') | Some(b'[') => items.push(self.parse_value()?),
                _ => {
                    let name = self.parse_name();
                    self.expect(b'=')?;
                    let value = self.parse_value()?;
                    let mut map = HashMap::new();
                    map.insert(name, value);
                    items.push(MiValue::Tuple(map));
                }
            }
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => return Ok(MiValue::List(items)),
                other => return Err(bad_data(format!("bad gdb/mi list separator {:?}", other))),
            }
        }
    }
}

/// A gdb child process speaking MI on its stdin/stdout.
pub struct MiSession {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

impl MiSession {
    pub fn spawn(gdb_path: &Path, args: &[OsString]) -> io::Result<MiSession> {
        let mut child = Command::new(gdb_path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let mut session = MiSession {
            child,
            stdin,
            reader: BufReader::new(stdout),
        };
        // Swallow the startup banner up to the first prompt.
        session.read_until_prompt()?;
        Ok(session)
    }

    /// Send one MI command and return its result record.
    pub fn send(&mut self, operation: &str, arguments: &str) -> io::Result<MiRecord> {
        if arguments.is_empty() {
            writeln!(self.stdin, "-{}", operation)?;
        } else {
            writeln!(self.stdin, "-{} {}", operation, arguments)?;
        }
        self.stdin.flush()?;
        self.read_result()
    }

    /// Resume the inferior (possibly backwards) and block until gdb reports
    /// the next stop. This is the engine's cooperative suspension point.
    pub fn continue_execution(&mut self, reverse: bool) -> io::Result<MiRecord> {
        let arguments = if reverse { "--reverse" } else { "" };
        let result = self.send("exec-continue", arguments)?;
        if result.class != "running" {
            return Err(bad_data(format!(
                "exec-continue did not start the inferior: {:?}",
                result
            )));
        }
        self.wait_for_stop()
    }

    pub fn exit(&mut self) {
        let _ = writeln!(self.stdin, "-gdb-exit");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "gdb closed its mi channel",
            ));
        }
        Ok(line)
    }

    fn read_result(&mut self) -> io::Result<MiRecord> {
        loop {
            let line = self.read_line()?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_mi_output_line(&line)? {
                MiOutput::Result(record) => return Ok(record),
                MiOutput::Prompt => continue,
                other => self.show_out_of_band(&other),
            }
        }
    }

    fn wait_for_stop(&mut self) -> io::Result<MiRecord> {
        loop {
            let line = self.read_line()?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_mi_output_line(&line)? {
                MiOutput::ExecAsync(record) => {
                    if record.class == "stopped" {
                        return Ok(record);
                    }
                    self.show_out_of_band(&MiOutput::ExecAsync(record));
                }
                MiOutput::Prompt => continue,
                other => self.show_out_of_band(&other),
            }
        }
    }

    fn read_until_prompt(&mut self) -> io::Result<()> {
        loop {
            let line = self.read_line()?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_mi_output_line(&line)? {
                MiOutput::Prompt => return Ok(()),
                other => self.show_out_of_band(&other),
            }
        }
    }

    fn show_out_of_band(&self, output: &MiOutput) {
        match output {
            MiOutput::Stream(_, text) => {
                if Flags::get().verbose {
                    print!("{}", text);
                }
            }
            MiOutput::ExecAsync(r) | MiOutput::NotifyAsync(r) | MiOutput::StatusAsync(r) => {
                if Flags::get().gdb_notify {
                    log!(crate::log::LogInfo, "gdb notification: {:?}", r);
                }
            }
            MiOutput::Result(_) | MiOutput::Prompt => (),
        }
    }
}

/// A gdb string response looks like `0x7f261d8624e8 "some string here"`;
/// an empty string looks like `0x7f44a33a9c1e ""`. Strip the outer quotes
/// and drop the backslash from every `\"`.
pub fn parse_gdb_string_response(gdb_response: &str) -> io::Result<String> {
    let first = gdb_response.find('"');
    let last = gdb_response.rfind('"');

    match (first, last) {
        (Some(first), Some(last)) if first != last => {
            Ok(unquote_gdb_string_result(&gdb_response[first + 1..last]))
        }
        _ => Err(bad_data(format!(
            "improper gdb data-evaluate-expression string response: {:?}",
            gdb_response
        ))),
    }
}

fn unquote_gdb_string_result(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut buf = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b'"' {
            buf.push('"');
            i += 2;
        } else {
            buf.push(bytes[i] as char);
            i += 1;
        }
    }
    buf
}

#[cfg(test)]
mod test {
    use crate::mi::{parse_gdb_string_response, parse_mi_output_line, MiOutput, MiValue};

    fn result_record(line: &str) -> crate::mi::MiRecord {
        match parse_mi_output_line(line).unwrap() {
            MiOutput::Result(r) => r,
            _ => panic!("expected a result record from {:?}", line),
        }
    }

    #[test]
    fn parses_done_with_value() {
        let r = result_record("^done,value=\"0x55 \\\"hello\\\"\"");
        assert_eq!(r.class, "done");
        assert_eq!(r.payload_const("value").unwrap(), "0x55 \"hello\"");
    }

    #[test]
    fn parses_breakpoint_insert_response() {
        let r = result_record(
            "^done,bkpt={number=\"2\",type=\"breakpoint\",disp=\"keep\",enabled=\"y\",times=\"0\"}",
        );
        assert_eq!(r.class, "done");
        let bkpt = &r.payload["bkpt"];
        assert_eq!(bkpt.get("number").unwrap().as_const().unwrap(), "2");
        assert_eq!(bkpt.get("disp").unwrap().as_const().unwrap(), "keep");
    }

    #[test]
    fn parses_stopped_async_record() {
        let line = "*stopped,reason=\"breakpoint-hit\",bkptno=\"1\",frame={func=\"dontbug_break_location\",line=\"14\"}";
        match parse_mi_output_line(line).unwrap() {
            MiOutput::ExecAsync(r) => {
                assert_eq!(r.class, "stopped");
                assert_eq!(r.payload_const("bkptno").unwrap(), "1");
                assert_eq!(
                    r.payload["frame"].get("line").unwrap().as_const().unwrap(),
                    "14"
                );
            }
            _ => panic!("expected an exec async record"),
        }
    }

    #[test]
    fn parses_lists_and_prompt() {
        let r = result_record("^done,numchild=\"2\",children=[child={name=\"a\"},child={name=\"b\"}]");
        match &r.payload["children"] {
            MiValue::List(items) => assert_eq!(items.len(), 2),
            other => panic!("expected a list, got {:?}", other),
        }

        assert!(matches!(
            parse_mi_output_line("(gdb)").unwrap(),
            MiOutput::Prompt
        ));
        assert!(matches!(
            parse_mi_output_line("~\"Reading symbols...\\n\"").unwrap(),
            MiOutput::Stream('~', _)
        ));
    }

    #[test]
    fn error_records_have_msg() {
        let r = result_record("^error,msg=\"No symbol table is loaded.\"");
        assert_eq!(r.class, "error");
        assert_eq!(r.payload_const("msg").unwrap(), "No symbol table is loaded.");
    }

    #[test]
    fn string_response_extraction() {
        assert_eq!(
            parse_gdb_string_response("0x7f261d8624e8 \"some string here\"").unwrap(),
            "some string here"
        );
        assert_eq!(parse_gdb_string_response("0x7f44a33a9c1e \"\"").unwrap(), "");
        assert_eq!(
            parse_gdb_string_response("0x1 \"a \\\"quoted\\\" word\"").unwrap(),
            "a \"quoted\" word"
        );
        assert!(parse_gdb_string_response("0x7f44a33a9c1e").is_err());
        assert!(parse_gdb_string_response("no quotes at all").is_err());
    }
}
