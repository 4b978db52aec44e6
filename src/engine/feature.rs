//! The DBGp feature table. Three value shapes, one "set from string /
//! render to string" capability, per-entry read-only flag.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::io;

#[derive(Clone, Debug)]
pub enum Feature {
    Bool { value: bool, read_only: bool },
    Int { value: i64, read_only: bool },
    Str { value: String, read_only: bool },
}

fn read_only_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        "trying to assign to a read only feature",
    )
}

impl Feature {
    pub fn set(&mut self, new_value: &str) -> io::Result<()> {
        match self {
            Feature::Bool { value, read_only } => {
                if *read_only {
                    return Err(read_only_error());
                }
                *value = match new_value {
                    "0" => false,
                    "1" => true,
                    _ => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("{:?} is not a boolean feature value", new_value),
                        ))
                    }
                };
            }
            Feature::Int { value, read_only } => {
                if *read_only {
                    return Err(read_only_error());
                }
                *value = new_value
                    .parse::<i64>()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            }
            Feature::Str { value, read_only } => {
                if *read_only {
                    return Err(read_only_error());
                }
                *value = new_value.to_owned();
            }
        }
        Ok(())
    }
}

impl Display for Feature {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Feature::Bool { value, .. } => write!(f, "{}", if *value { "1" } else { "0" }),
            Feature::Int { value, .. } => write!(f, "{}", value),
            Feature::Str { value, .. } => write!(f, "{}", value),
        }
    }
}

fn ro_bool(value: bool) -> Feature {
    Feature::Bool {
        value,
        read_only: true,
    }
}

fn rw_bool(value: bool) -> Feature {
    Feature::Bool {
        value,
        read_only: false,
    }
}

fn ro_int(value: i64) -> Feature {
    Feature::Int {
        value,
        read_only: true,
    }
}

fn rw_int(value: i64) -> Feature {
    Feature::Int {
        value,
        read_only: false,
    }
}

fn ro_str(value: &str) -> Feature {
    Feature::Str {
        value: value.to_owned(),
        read_only: true,
    }
}

pub fn init_feature_map() -> HashMap<String, Feature> {
    let mut map: HashMap<String, Feature> = HashMap::new();
    map.insert("language_supports_threads".into(), ro_bool(false));
    map.insert("language_name".into(), ro_str("PHP"));
    map.insert("language_version".into(), ro_str("7.0"));
    map.insert("encoding".into(), ro_str("ISO-8859-1"));
    map.insert("protocol_version".into(), ro_int(1));
    map.insert("supports_async".into(), ro_bool(false));
    map.insert(
        "breakpoint_types".into(),
        ro_str("line call return exception conditional watch"),
    );
    map.insert("multiple_sessions".into(), rw_bool(false));
    map.insert("max_children".into(), rw_int(64));
    map.insert("max_data".into(), rw_int(2048));
    map.insert("max_depth".into(), rw_int(1));
    map.insert("extended_properties".into(), rw_bool(false));
    map.insert("show_hidden".into(), rw_bool(false));
    map
}

#[cfg(test)]
mod test {
    use crate::engine::feature::init_feature_map;

    #[test]
    fn seeded_values_render() {
        let map = init_feature_map();
        assert_eq!(map["language_name"].to_string(), "PHP");
        assert_eq!(map["protocol_version"].to_string(), "1");
        assert_eq!(map["language_supports_threads"].to_string(), "0");
        assert_eq!(map["max_children"].to_string(), "64");
    }

    #[test]
    fn read_only_features_reject_writes() {
        let mut map = init_feature_map();
        assert!(map.get_mut("language_name").unwrap().set("Perl").is_err());
        assert!(map.get_mut("supports_async").unwrap().set("1").is_err());
        // Unchanged after the failed writes.
        assert_eq!(map["language_name"].to_string(), "PHP");
    }

    #[test]
    fn writable_features_round_trip() {
        let mut map = init_feature_map();
        map.get_mut("max_depth").unwrap().set("5").unwrap();
        assert_eq!(map["max_depth"].to_string(), "5");

        map.get_mut("multiple_sessions").unwrap().set("1").unwrap();
        assert_eq!(map["multiple_sessions"].to_string(), "1");

        // A boolean only takes 0 or 1.
        assert!(map.get_mut("show_hidden").unwrap().set("yes").is_err());
        // An int only takes integers.
        assert!(map.get_mut("max_data").unwrap().set("lots").is_err());
    }
}
