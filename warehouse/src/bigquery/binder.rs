use std::collections::HashSet;

use crate::driver::NamedValue;
use crate::types::Value;

/// A parameter ready to be sent with a BigQuery job.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeParameter {
    /// Parameter name for `@name` markers, [`None`] for `?` markers.
    pub name: Option<String>,
    pub value: Value,
}

/// How the parameters of a job are matched to the markers of its query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterMode {
    Named,
    Positional,
}

impl ParameterMode {
    /// Value expected by the `parameterMode` field of a query request.
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterMode::Named => "NAMED",
            ParameterMode::Positional => "POSITIONAL",
        }
    }
}

/// Counts the parameter markers in `query`.
///
/// A query containing any `?` is treated as positional and every `?` counts. Otherwise the
/// number of distinct `@name` markers is returned; `@@` system variables are skipped. Markers
/// are not told apart from string literal or comment content, and mixing both styles gives an
/// unspecified result.
pub fn count_parameters(query: &str) -> usize {
    let positional = query.bytes().filter(|byte| *byte == b'?').count();
    if positional > 0 {
        return positional;
    }

    let bytes = query.as_bytes();
    let mut names = HashSet::new();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] != b'@' {
            index += 1;
            continue;
        }

        if bytes.get(index + 1) == Some(&b'@') {
            // System variable such as `@@project_id`, skip the marker and its name.
            index += 2;
            while index < bytes.len() && is_identifier_byte(bytes[index]) {
                index += 1;
            }
            continue;
        }

        let start = index + 1;
        let mut end = start;
        if end < bytes.len() && is_identifier_start(bytes[end]) {
            end += 1;
            while end < bytes.len() && is_identifier_byte(bytes[end]) {
                end += 1;
            }
            names.insert(&query[start..end]);
        }

        index = end.max(start);
    }

    names.len()
}

/// Converts caller arguments into job parameters.
///
/// Named arguments keep their name (without a leading `@`), unnamed ones become positional
/// parameters in argument order. Expressions are replaced by their native value, including
/// those nested in arrays.
pub fn bind_parameters(args: &[NamedValue]) -> Vec<NativeParameter> {
    args.iter()
        .map(|arg| NativeParameter {
            name: arg
                .name
                .as_deref()
                .map(|name| name.trim_start_matches('@').to_string()),
            value: arg.value.clone().into_native(),
        })
        .collect()
}

/// Returns the parameter mode matching `parameters`, or [`None`] when there are none.
pub fn parameter_mode(parameters: &[NativeParameter]) -> Option<ParameterMode> {
    if parameters.is_empty() {
        return None;
    }

    if parameters.iter().any(|parameter| parameter.name.is_some()) {
        Some(ParameterMode::Named)
    } else {
        Some(ParameterMode::Positional)
    }
}

fn is_identifier_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
