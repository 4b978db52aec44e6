//! The engine's view of one breakpoint. Every PHP-level breakpoint the IDE
//! sets has an entry here *and* a gdb twin; internal breakpoints (the
//! stepping breakpoint, the step-over stack-level breakpoint) are pure gdb
//! breakpoints and are mostly created and thrown away on demand.

use std::fmt::{self, Display, Formatter};
use std::io;
use std::str::FromStr;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BreakpointType {
    Line,
    Call,
    Return,
    Exception,
    Conditional,
    Watch,
    /// Not a PHP breakpoint: belongs to the engine itself.
    Internal,
}

impl FromStr for BreakpointType {
    type Err = io::Error;

    // Deliberately omits the internal breakpoint type: the IDE can never
    // ask for one.
    fn from_str(s: &str) -> io::Result<BreakpointType> {
        match s {
            "line" => Ok(BreakpointType::Line),
            "call" => Ok(BreakpointType::Call),
            "return" => Ok(BreakpointType::Return),
            "exception" => Ok(BreakpointType::Exception),
            "conditional" => Ok(BreakpointType::Conditional),
            "watch" => Ok(BreakpointType::Watch),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown breakpoint type {:?}", s),
            )),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BreakpointState {
    Enabled,
    Disabled,
}

impl Display for BreakpointState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            BreakpointState::Enabled => write!(f, "enabled"),
            BreakpointState::Disabled => write!(f, "disabled"),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum HitCondition {
    GtEq,
    Eq,
    Mod,
}

impl FromStr for HitCondition {
    type Err = io::Error;

    fn from_str(s: &str) -> io::Result<HitCondition> {
        match s {
            ">=" => Ok(HitCondition::GtEq),
            "==" => Ok(HitCondition::Eq),
            "%" => Ok(HitCondition::Mod),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown hit condition {:?}", s),
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Breakpoint {
    /// The gdb breakpoint number; also the id reported to the IDE.
    pub id: String,
    pub bp_type: BreakpointType,
    pub filename: String,
    pub lineno: u32,
    pub state: BreakpointState,
    pub temporary: bool,
    pub hit_count: u64,
    pub hit_value: u64,
    pub hit_condition: Option<HitCondition>,
    pub exception: Option<String>,
    pub expression: Option<String>,
}

impl Breakpoint {
    pub fn line(id: String, filename: String, lineno: u32, state: BreakpointState) -> Breakpoint {
        Breakpoint {
            id,
            bp_type: BreakpointType::Line,
            filename,
            lineno,
            state,
            temporary: false,
            hit_count: 0,
            hit_value: 0,
            hit_condition: None,
            exception: None,
            expression: None,
        }
    }

    pub fn internal(id: String, filename: String, lineno: u32) -> Breakpoint {
        Breakpoint {
            id,
            bp_type: BreakpointType::Internal,
            filename,
            lineno,
            state: BreakpointState::Disabled,
            temporary: false,
            hit_count: 0,
            hit_value: 0,
            hit_condition: None,
            exception: None,
            expression: None,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::engine::breakpoint::{BreakpointType, HitCondition};

    #[test]
    fn breakpoint_types_parse() {
        assert_eq!("line".parse::<BreakpointType>().unwrap(), BreakpointType::Line);
        assert_eq!("watch".parse::<BreakpointType>().unwrap(), BreakpointType::Watch);
        // The internal type is not reachable from the wire.
        assert!("internal".parse::<BreakpointType>().is_err());
        assert!("lines".parse::<BreakpointType>().is_err());
    }

    #[test]
    fn hit_conditions_parse() {
        assert_eq!(">=".parse::<HitCondition>().unwrap(), HitCondition::GtEq);
        assert_eq!("%".parse::<HitCondition>().unwrap(), HitCondition::Mod);
        assert!("<=".parse::<HitCondition>().is_err());
    }
}
