//! The DBGp debug engine proper: owns the gdb session, the feature table,
//! the breakpoint table and the source map, and turns each IDE request into
//! gdb/mi traffic plus a DBGp XML reply.
//!
//! Stepping works by breakpoint arithmetic on the generated C file. The
//! persistent gdb breakpoint "1" sits on STEP_LINE and is enabled only for
//! the duration of a step_into; step_over instead plants a temporary
//! breakpoint on the same line conditioned on the PHP stack depth not
//! growing. Reverse variants are the same dance with `exec-continue
//! --reverse`.

use crate::break_map::BreakpointLocMap;
use crate::codegen::{BREAK_FILE_NAME, STEP_LINE};
use crate::dbgp::{check_sequence, DbgpCommand};
use crate::engine::breakpoint::{Breakpoint, BreakpointState, BreakpointType};
use crate::engine::feature::{init_feature_map, Feature};
use crate::log::LogInfo;
use crate::mi::{parse_gdb_string_response, MiRecord, MiSession, MiValue};
use std::collections::HashMap;
use std::process;
use std::sync::{Arc, Mutex};

pub mod breakpoint;
pub mod feature;

/// gdb numbers breakpoints from 1 and the stepping breakpoint is always
/// inserted first, so it is always breakpoint "1".
pub const MASTER_BREAKPOINT: &str = "1";

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Status {
    Starting,
    Running,
    Break,
    Stopping,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Status::Starting => write!(f, "starting"),
            Status::Running => write!(f, "running"),
            Status::Break => write!(f, "break"),
            Status::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Reason {
    Ok,
    Error,
    Aborted,
    Exception,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Reason::Ok => write!(f, "ok"),
            Reason::Error => write!(f, "error"),
            Reason::Aborted => write!(f, "aborted"),
            Reason::Exception => write!(f, "exception"),
        }
    }
}

/// Session-scoped copy of the global flags, taken at construction time.
#[derive(Copy, Clone)]
pub struct Settings {
    pub verbose: bool,
}

pub struct EngineState {
    /// Shared with the operator input thread, which may use it for raw
    /// gdb/mi passthrough while the dispatcher is idle.
    pub gdb: Arc<Mutex<MiSession>>,
    pub entry_file_php: String,
    pub last_sequence_num: i64,
    pub status: Status,
    pub reason: Reason,
    pub feature_map: HashMap<String, Feature>,
    pub breakpoints: HashMap<String, Breakpoint>,
    pub source_map: BreakpointLocMap,
    pub settings: Settings,
}

impl EngineState {
    pub fn new(
        gdb: Arc<Mutex<MiSession>>,
        entry_file_php: String,
        source_map: BreakpointLocMap,
        settings: Settings,
    ) -> EngineState {
        let mut breakpoints: HashMap<String, Breakpoint> = HashMap::with_capacity(10);
        breakpoints.insert(
            MASTER_BREAKPOINT.to_owned(),
            Breakpoint::internal(
                MASTER_BREAKPOINT.to_owned(),
                BREAK_FILE_NAME.to_owned(),
                STEP_LINE,
            ),
        );

        EngineState {
            gdb,
            entry_file_php,
            last_sequence_num: 0,
            status: Status::Starting,
            reason: Reason::Ok,
            feature_map: init_feature_map(),
            breakpoints,
            source_map,
            settings,
        }
    }

    pub fn init_packet(&self) -> String {
        init_xml(&self.entry_file_php, process::id())
    }

    /// Dispatch one IDE command line and produce the reply payload.
    pub fn handle_ide_request(&mut self, command: &str, reverse: bool) -> String {
        let dbgp_cmd = match DbgpCommand::parse(command) {
            Ok(cmd) => cmd,
            Err(e) => fatal!("Malformed command from IDE {:?}: {}", command, e),
        };

        if let Err(e) = check_sequence(&mut self.last_sequence_num, dbgp_cmd.sequence) {
            fatal!("{}", e);
        }

        match dbgp_cmd.command.as_str() {
            "feature_set" => self.handle_feature_set(&dbgp_cmd),
            "status" => self.handle_status(&dbgp_cmd),
            "breakpoint_set" => self.handle_breakpoint_set(&dbgp_cmd),
            "step_into" => self.handle_step_into(&dbgp_cmd, reverse),
            "step_over" => self.handle_step_over(&dbgp_cmd, reverse),
            "eval" | "stack_get" | "stack_depth" | "context_names" | "context_get" => {
                self.handle_with_no_gdb_breakpoints(&dbgp_cmd)
            }
            "typemap_get" | "property_get" | "property_value" => self.handle_standard(&dbgp_cmd),
            "stop" => self.handle_stop(),
            _ => fatal!("Unimplemented command: {}", command),
        }
    }

    fn handle_feature_set(&mut self, cmd: &DbgpCommand) -> String {
        let n = required_option(cmd, "n");
        let v = required_option(cmd, "v");

        match self.feature_map.get_mut(&n) {
            Some(feature) => {
                if let Err(e) = feature.set(&v) {
                    fatal!("Could not set feature {}: {}", n, e);
                }
            }
            None => fatal!("Unknown feature: {}", n),
        }

        feature_set_response(cmd.sequence, &n)
    }

    fn handle_status(&self, cmd: &DbgpCommand) -> String {
        status_response(cmd.sequence, self.status, self.reason)
    }

    fn handle_breakpoint_set(&mut self, cmd: &DbgpCommand) -> String {
        let t = required_option(cmd, "t");
        let bp_type = match t.parse::<BreakpointType>() {
            Ok(bp_type) => bp_type,
            Err(e) => fatal!("{}", e),
        };

        match bp_type {
            BreakpointType::Line => self.handle_breakpoint_set_line(cmd),
            // TODO the feature bitmap advertises these; teach the extension
            // about them and remove this abort
            _ => fatal!("Unimplemented breakpoint type {:?}", bp_type),
        }
    }

    fn handle_breakpoint_set_line(&mut self, cmd: &DbgpCommand) -> String {
        let php_filename = required_option(cmd, "f");
        let disabled = cmd.options.get("s").map(String::as_str) == Some("disabled");

        let php_lineno = match required_option(cmd, "n").parse::<u32>() {
            Ok(lineno) => lineno,
            Err(e) => fatal!("Bad line number in breakpoint_set: {}", e),
        };

        let id = self.set_php_breakpoint_in_gdb(&php_filename, php_lineno, disabled);
        breakpoint_set_line_response(cmd.sequence, &id)
    }

    /// Algorithm:
    /// 1. Disable all breakpoints
    /// 2. Enable breakpoint 1
    /// 3. exec-continue (--reverse when stepping backwards)
    /// 4. gdb breaks on breakpoint 1; get filename and lineno, send XML
    /// 5. Disable breakpoint 1
    fn handle_step_into(&mut self, cmd: &DbgpCommand, reverse: bool) -> String {
        self.disable_all_gdb_breakpoints();
        self.enable_gdb_breakpoint(MASTER_BREAKPOINT);
        self.continue_execution(reverse);
        self.disable_gdb_breakpoint(MASTER_BREAKPOINT);

        self.status = Status::Break;
        self.reason = Reason::Ok;

        let filename = self.gdb_string_value("filename");
        let lineno = self.gdb_int_value("lineno");
        step_break_response("step_into", cmd.sequence, &filename, lineno)
    }

    fn handle_step_over(&mut self, cmd: &DbgpCommand, reverse: bool) -> String {
        self.disable_all_gdb_breakpoints();

        // We're interested in maintaining or decreasing the stack level
        let current_php_stack_level = self.gdb_cmd_value("level");
        let id = self.set_stack_level_breakpoint_in_gdb(&current_php_stack_level);
        self.continue_execution(reverse);

        // Though this is a temporary breakpoint, it may not have been
        // triggered, e.g. when a PHP breakpoint cut the step short.
        self.remove_gdb_breakpoint(&id);

        self.status = Status::Break;
        self.reason = Reason::Ok;

        let filename = self.gdb_string_value("filename");
        let lineno = self.gdb_int_value("lineno");
        step_break_response("step_over", cmd.sequence, &filename, lineno)
    }

    /// For commands that must not make execution progress *and* must not
    /// observe any stopping condition while the helper runs inside the
    /// inferior.
    fn handle_with_no_gdb_breakpoints(&mut self, cmd: &DbgpCommand) -> String {
        let bp_list = self.enabled_php_breakpoints();
        self.disable_all_gdb_breakpoints();
        let result = self.gdb_string_value(&format!(
            "dontbug_xdebug_cmd(\"{}\")",
            cmd.full_command
        ));
        self.enable_gdb_breakpoints(&bp_list);
        result
    }

    /// The helper answers from state that is already materialised, so no
    /// breakpoint shuffling is needed.
    fn handle_standard(&mut self, cmd: &DbgpCommand) -> String {
        self.gdb_string_value(&format!("dontbug_xdebug_cmd(\"{}\")", cmd.full_command))
    }

    fn handle_stop(&mut self) -> ! {
        log!(LogInfo, "IDE asked dontbug engine to stop. Exiting...");
        self.status = Status::Stopping;
        self.shutdown(0)
    }

    /// Terminate the gdb session (which lets rr finalise) and exit.
    pub fn shutdown(&mut self, code: i32) -> ! {
        self.gdb.lock().unwrap().exit();
        process::exit(code)
    }

    // ---- gdb plumbing ----

    fn send_gdb_command(&self, operation: &str, arguments: &str) -> MiRecord {
        if self.settings.verbose {
            println!("dontbug -> gdb: {} {}", operation, arguments);
        }

        let result = self.gdb.lock().unwrap().send(operation, arguments);
        let record = match result {
            Ok(record) => record,
            Err(e) => fatal!(
                "Could not execute the gdb/mi command: {} {}: {}",
                operation,
                arguments,
                e
            ),
        };

        if self.settings.verbose {
            let rendered = format!("{:?}", record);
            println!("gdb -> dontbug: {}", truncated(&rendered, 300));
        }
        record
    }

    /// data-evaluate-expression, raw value text.
    fn gdb_cmd_value(&self, expression: &str) -> String {
        let record = self.send_gdb_command("data-evaluate-expression", expression);
        if record.class != "done" {
            fatal!(
                "Could not execute the gdb/mi command: data-evaluate-expression {}",
                expression
            );
        }
        match record.payload_const("value") {
            Some(value) => value.to_owned(),
            None => fatal!(
                "No value in response to: data-evaluate-expression {}",
                expression
            ),
        }
    }

    /// data-evaluate-expression on a `char *`, unwrapped to the string text.
    fn gdb_string_value(&self, expression: &str) -> String {
        let response = self.gdb_cmd_value(expression);
        match parse_gdb_string_response(&response) {
            Ok(text) => text,
            Err(e) => fatal!("{}", e),
        }
    }

    fn gdb_int_value(&self, expression: &str) -> i64 {
        let response = self.gdb_cmd_value(expression);
        match response.trim().parse::<i64>() {
            Ok(n) => n,
            Err(e) => fatal!("Expected an integer for {}, got {:?}: {}", expression, response, e),
        }
    }

    fn enabled_php_breakpoints(&self) -> Vec<String> {
        self.breakpoints
            .iter()
            .filter(|(_, bp)| {
                bp.state == BreakpointState::Enabled && bp.bp_type != BreakpointType::Internal
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    // Note that not all internal breakpoints are stored in the breakpoints
    // table, but break-disable with no arguments hits them all anyway.
    fn disable_all_gdb_breakpoints(&mut self) {
        self.send_gdb_command("break-disable", "");
        for bp in self.breakpoints.values_mut() {
            bp.state = BreakpointState::Disabled;
        }
    }

    fn enable_gdb_breakpoints(&mut self, bp_list: &[String]) {
        // An empty argument list would mean "all breakpoints" to gdb.
        if bp_list.is_empty() {
            return;
        }
        self.send_gdb_command("break-enable", &bp_list.join(" "));
        for id in bp_list {
            if let Some(bp) = self.breakpoints.get_mut(id) {
                bp.state = BreakpointState::Enabled;
            }
        }
    }

    fn disable_gdb_breakpoints(&mut self, bp_list: &[String]) {
        if bp_list.is_empty() {
            return;
        }
        self.send_gdb_command("break-disable", &bp_list.join(" "));
        for id in bp_list {
            if let Some(bp) = self.breakpoints.get_mut(id) {
                bp.state = BreakpointState::Disabled;
            }
        }
    }

    fn enable_gdb_breakpoint(&mut self, bp: &str) {
        self.enable_gdb_breakpoints(&[bp.to_owned()]);
    }

    fn disable_gdb_breakpoint(&mut self, bp: &str) {
        self.disable_gdb_breakpoints(&[bp.to_owned()]);
    }

    /// Set the gdb twin of a PHP line breakpoint and record it in the
    /// breakpoints table. Returns the gdb breakpoint number.
    fn set_php_breakpoint_in_gdb(
        &mut self,
        php_filename: &str,
        php_lineno: u32,
        disabled: bool,
    ) -> String {
        let internal_lineno = match self.source_map.get(php_filename) {
            Some(&lineno) => lineno,
            None => clean_fatal!(
                "Not able to find {} to add a breakpoint. You need to run 'dontbug generate' specific to this project, most likely",
                php_filename
            ),
        };

        let breakpoint_state = if disabled {
            BreakpointState::Disabled
        } else {
            BreakpointState::Enabled
        };
        // Note the space after -d
        let disabled_flag = if disabled { "-d " } else { "" };

        let result = self.send_gdb_command(
            "break-insert",
            &format!(
                "{}-f -c \"lineno == {}\" --source {} --line {}",
                disabled_flag, php_lineno, BREAK_FILE_NAME, internal_lineno
            ),
        );
        if result.class != "done" {
            fatal!("Breakpoint was not set successfully");
        }

        let id = breakpoint_number(&result);
        if self.breakpoints.contains_key(&id) {
            fatal!("Breakpoint number not unique: {}", id);
        }

        self.breakpoints.insert(
            id.clone(),
            Breakpoint::line(
                id.clone(),
                php_filename.to_owned(),
                php_lineno,
                breakpoint_state,
            ),
        );

        id
    }

    /// Temporary breakpoint that fires when the PHP stack is at or below
    /// `level`. Does not make an entry in the breakpoints table.
    fn set_stack_level_breakpoint_in_gdb(&mut self, level: &str) -> String {
        let result = self.send_gdb_command(
            "break-insert",
            &format!(
                "-t -f -c \"level <= {}\" --source {} --line {}",
                level, BREAK_FILE_NAME, STEP_LINE
            ),
        );
        if result.class != "done" {
            fatal!("Breakpoint was not set successfully");
        }
        breakpoint_number(&result)
    }

    fn remove_gdb_breakpoint(&mut self, id: &str) {
        self.send_gdb_command("break-delete", id);
        self.breakpoints.remove(id);
    }

    fn continue_execution(&mut self, reverse: bool) {
        self.status = Status::Running;
        if self.settings.verbose {
            println!(
                "dontbug -> gdb: exec-continue{}",
                if reverse { " --reverse" } else { "" }
            );
        }
        let result = self.gdb.lock().unwrap().continue_execution(reverse);
        match result {
            Ok(stopped) => {
                if self.settings.verbose {
                    let rendered = format!("{:?}", stopped);
                    println!("gdb -> dontbug: {}", truncated(&rendered, 300));
                }
            }
            Err(e) => fatal!("exec-continue failed: {}", e),
        }
    }
}

/// The `number` field of a break-insert response.
pub(crate) fn breakpoint_number(record: &MiRecord) -> String {
    let number = record
        .payload
        .get("bkpt")
        .and_then(|bkpt| bkpt.get("number"))
        .and_then(MiValue::as_const);
    match number {
        Some(number) => number.to_owned(),
        None => fatal!("No breakpoint number in gdb response: {:?}", record),
    }
}

fn required_option(cmd: &DbgpCommand, key: &str) -> String {
    match cmd.options.get(key) {
        Some(value) => value.clone(),
        None => fatal!("Please provide -{} option in {}", key, cmd.command),
    }
}

/// Truncate for console echo; protocol data is never truncated.
pub fn truncated(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &s[..cut])
    } else {
        s.to_owned()
    }
}

// ---- The DBGp XML reply templates. The attribute layout is part of the
// wire format; substitute fields only. ----

pub fn init_xml(entry_file_php: &str, appid: u32) -> String {
    format!(
        "<init xmlns=\"urn:debugger_protocol_v1\" language=\"PHP\" protocol_version=\"1.0\"\n\t\tfileuri=\"file://{}\"\n\t\tappid=\"{}\" idekey=\"dontbug\">\n\t\t<engine version=\"0.0.1\"><![CDATA[dontbug]]></engine>\n\t</init>",
        entry_file_php, appid
    )
}

pub fn feature_set_response(transaction_id: i64, feature: &str) -> String {
    format!(
        "<response xmlns=\"urn:debugger_protocol_v1\" command=\"feature_set\"\n\t\ttransaction_id=\"{}\" feature=\"{}\" success=\"1\">\n\t</response>",
        transaction_id, feature
    )
}

pub fn status_response(transaction_id: i64, status: Status, reason: Reason) -> String {
    format!(
        "<response xmlns=\"urn:debugger_protocol_v1\" command=\"status\"\n\t\ttransaction_id=\"{}\" status=\"{}\" reason=\"{}\">\n\t</response>",
        transaction_id, status, reason
    )
}

pub fn breakpoint_set_line_response(transaction_id: i64, id: &str) -> String {
    format!(
        "<response xmlns=\"urn:debugger_protocol_v1\" command=\"breakpoint_set\"\n\t\ttransaction_id=\"{}\" id=\"{}\">\n\t</response>",
        transaction_id, id
    )
}

pub fn step_break_response(command: &str, transaction_id: i64, filename: &str, lineno: i64) -> String {
    format!(
        "<response xmlns=\"urn:debugger_protocol_v1\" xmlns:xdebug=\"http://xdebug.org/dbgp/xdebug\" command=\"{}\"\n\t\ttransaction_id=\"{}\" status=\"break\" reason=\"ok\">\n\t\t<xdebug:message filename=\"{}\" lineno=\"{}\"></xdebug:message>\n\t</response>",
        command, transaction_id, filename, lineno
    )
}

#[cfg(test)]
mod test {
    use crate::engine::{
        breakpoint_set_line_response, feature_set_response, init_xml, status_response,
        step_break_response, truncated, Reason, Status,
    };

    #[test]
    fn feature_set_reply_fields() {
        let xml = feature_set_response(7, "max_depth");
        assert!(xml.contains("command=\"feature_set\""));
        assert!(xml.contains("transaction_id=\"7\" feature=\"max_depth\" success=\"1\""));
        assert!(xml.starts_with("<response xmlns=\"urn:debugger_protocol_v1\""));
        assert!(xml.ends_with("</response>"));
    }

    #[test]
    fn status_reply_fields() {
        let xml = status_response(3, Status::Starting, Reason::Ok);
        assert!(xml.contains("transaction_id=\"3\" status=\"starting\" reason=\"ok\""));

        let xml = status_response(4, Status::Break, Reason::Aborted);
        assert!(xml.contains("status=\"break\" reason=\"aborted\""));

        let xml = status_response(5, Status::Stopping, Reason::Error);
        assert!(xml.contains("status=\"stopping\" reason=\"error\""));

        let xml = status_response(6, Status::Running, Reason::Exception);
        assert!(xml.contains("status=\"running\" reason=\"exception\""));
    }

    #[test]
    fn breakpoint_set_reply_fields() {
        let xml = breakpoint_set_line_response(8, "2");
        assert!(xml.contains("command=\"breakpoint_set\""));
        assert!(xml.contains("transaction_id=\"8\" id=\"2\""));
    }

    #[test]
    fn step_reply_fields() {
        let xml = step_break_response("step_into", 11, "/src/a.php", 17);
        assert!(xml.contains("command=\"step_into\""));
        assert!(xml.contains("status=\"break\" reason=\"ok\""));
        assert!(xml.contains("<xdebug:message filename=\"/src/a.php\" lineno=\"17\"></xdebug:message>"));

        let xml = step_break_response("step_over", 12, "/src/a.php", 18);
        assert!(xml.contains("command=\"step_over\""));
    }

    #[test]
    fn init_packet_fields() {
        let xml = init_xml("/var/www/index.php", 4242);
        assert!(xml.contains("fileuri=\"file:///var/www/index.php\""));
        assert!(xml.contains("appid=\"4242\" idekey=\"dontbug\""));
        assert!(xml.contains("<![CDATA[dontbug]]>"));
    }

    #[test]
    fn truncation_is_for_echo_only() {
        assert_eq!(truncated("short", 300), "short");
        let long = "x".repeat(400);
        let t = truncated(&long, 300);
        assert_eq!(t.len(), 303);
        assert!(t.ends_with("..."));
    }
}
