//! Status vectors and server message rendering.
//!
//! Every `op_response` ends with a status vector: a sequence of typed
//! arguments terminated by `isc_arg_end`. A non-zero `isc_arg_gds` code means
//! the operation failed; `isc_arg_warning` entries carry non-fatal messages.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;
use crate::xdr;

/// Status argument kinds (`isc_arg_*`).
pub mod arg {
    /// End of vector.
    pub const END: i32 = 0;
    /// Error code.
    pub const GDS: i32 = 1;
    /// String parameter.
    pub const STRING: i32 = 2;
    /// Counted string parameter.
    pub const CSTRING: i32 = 3;
    /// Numeric parameter.
    pub const NUMBER: i32 = 4;
    /// Preformatted message.
    pub const INTERPRETED: i32 = 5;
    /// Unix errno.
    pub const UNIX: i32 = 7;
    /// Win32 error code.
    pub const WIN32: i32 = 17;
    /// Warning code.
    pub const WARNING: i32 = 18;
    /// SQLSTATE.
    pub const SQL_STATE: i32 = 19;
}

/// Well-known error codes (`isc_*`).
pub mod codes {
    /// `isc_bad_db_format`.
    pub const BAD_DB_FORMAT: u32 = 335_544_323;
    /// `isc_bad_db_handle`.
    pub const BAD_DB_HANDLE: u32 = 335_544_324;
    /// `isc_bad_dpb_content`.
    pub const BAD_DPB_CONTENT: u32 = 335_544_325;
    /// `isc_bad_dpb_form`.
    pub const BAD_DPB_FORM: u32 = 335_544_326;
    /// `isc_bad_trans_handle`.
    pub const BAD_TRANS_HANDLE: u32 = 335_544_332;
    /// `isc_bug_check`.
    pub const BUG_CHECK: u32 = 335_544_333;
    /// `isc_deadlock`.
    pub const DEADLOCK: u32 = 335_544_336;
    /// `isc_io_error`.
    pub const IO_ERROR: u32 = 335_544_344;
    /// `isc_lock_conflict`.
    pub const LOCK_CONFLICT: u32 = 335_544_345;
    /// `isc_no_priv`.
    pub const NO_PRIV: u32 = 335_544_352;
    /// `isc_sys_request`.
    pub const SYS_REQUEST: u32 = 335_544_373;
    /// `isc_unavailable`.
    pub const UNAVAILABLE: u32 = 335_544_375;
    /// `isc_wrong_ods`.
    pub const WRONG_ODS: u32 = 335_544_379;
    /// `isc_random`.
    pub const RANDOM: u32 = 335_544_382;
    /// `isc_connect_reject`.
    pub const CONNECT_REJECT: u32 = 335_544_421;
    /// `isc_login`.
    pub const LOGIN: u32 = 335_544_472;
    /// `isc_lock_timeout`.
    pub const LOCK_TIMEOUT: u32 = 335_544_510;
    /// `isc_shutdown`.
    pub const SHUTDOWN: u32 = 335_544_528;
    /// `isc_drdb_completed_with_errs`.
    pub const DROP_COMPLETED_WITH_ERRORS: u32 = 335_544_667;
    /// `isc_network_error`.
    pub const NETWORK_ERROR: u32 = 335_544_721;
    /// `isc_net_connect_err`.
    pub const NET_CONNECT_ERR: u32 = 335_544_722;
    /// `isc_net_read_err`.
    pub const NET_READ_ERR: u32 = 335_544_726;
    /// `isc_net_write_err`.
    pub const NET_WRITE_ERR: u32 = 335_544_727;
}

/// Message template for a known code; `@n` marks the n-th parameter.
#[must_use]
pub fn message_template(code: u32) -> Option<&'static str> {
    let template = match code {
        codes::BAD_DB_FORMAT => "file @1 is not a valid database",
        codes::BAD_DB_HANDLE => "invalid database handle (no active connection)",
        codes::BAD_DPB_CONTENT => "bad parameters on attach or create database",
        codes::BAD_DPB_FORM => "unrecognized database parameter block",
        codes::BAD_TRANS_HANDLE => {
            "invalid transaction handle (expecting explicit transaction start)"
        }
        codes::BUG_CHECK => "internal Firebird consistency check (@1)",
        codes::DEADLOCK => "deadlock",
        codes::IO_ERROR => "I/O error during \"@1\" operation for file \"@2\"",
        codes::LOCK_CONFLICT => "lock conflict on no wait transaction",
        codes::NO_PRIV => "no permission for @1 access to @2 @3",
        codes::SYS_REQUEST => "operating system directive @1 failed",
        codes::UNAVAILABLE => "unavailable database",
        codes::WRONG_ODS => {
            "unsupported on-disk structure for file @1; found @2.@3, support @4.@5"
        }
        codes::RANDOM => "@1",
        codes::CONNECT_REJECT => "connection rejected by remote interface",
        codes::LOGIN => {
            "Your user name and password are not defined. Ask your database administrator to set up a Firebird login."
        }
        codes::LOCK_TIMEOUT => "lock time-out on wait transaction",
        codes::SHUTDOWN => "database @1 shutdown",
        codes::DROP_COMPLETED_WITH_ERRORS => "drop database completed with errors",
        codes::NETWORK_ERROR => "Unable to complete network request to host \"@1\".",
        codes::NET_CONNECT_ERR => "Failed to establish a connection.",
        codes::NET_READ_ERR => "Error reading data from the connection.",
        codes::NET_WRITE_ERR => "Error writing data to the connection.",
        _ => return None,
    };
    Some(template)
}

/// One argument of a status vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusArg {
    /// Error code (`isc_arg_gds`); zero means success.
    Gds(u32),
    /// Warning code (`isc_arg_warning`).
    Warning(u32),
    /// String parameter of the preceding code.
    String(String),
    /// Numeric parameter of the preceding code.
    Number(i32),
    /// Preformatted message.
    Interpreted(String),
    /// SQLSTATE of the error.
    SqlState(String),
    /// Operating system error (`isc_arg_unix`, `isc_arg_win32`, ...).
    Os {
        /// Argument kind.
        kind: i32,
        /// OS error code.
        code: i32,
    },
}

/// A non-fatal server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusWarning {
    /// Warning code.
    pub code: u32,
    /// Rendered message.
    pub message: String,
}

/// Parsed status vector.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusVector {
    args: Vec<StatusArg>,
}

impl StatusVector {
    /// Status vector reporting success.
    #[must_use]
    pub fn success() -> Self {
        Self {
            args: vec![StatusArg::Gds(0)],
        }
    }

    /// Build a vector from arguments.
    #[must_use]
    pub fn from_args(args: Vec<StatusArg>) -> Self {
        Self { args }
    }

    /// Error vector with one code and its string parameters.
    #[must_use]
    pub fn error(code: u32, params: &[&str]) -> Self {
        let mut args = vec![StatusArg::Gds(code)];
        args.extend(params.iter().map(|p| StatusArg::String((*p).to_string())));
        Self { args }
    }

    /// Raw arguments.
    #[must_use]
    pub fn args(&self) -> &[StatusArg] {
        &self.args
    }

    /// First non-zero error code.
    #[must_use]
    pub fn error_code(&self) -> Option<u32> {
        self.args.iter().find_map(|a| match a {
            StatusArg::Gds(code) if *code != 0 => Some(*code),
            _ => None,
        })
    }

    /// True when the vector reports a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_code().is_some()
    }

    /// SQLSTATE, if the server sent one.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        self.args.iter().find_map(|a| match a {
            StatusArg::SqlState(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Rendered error message (warnings excluded).
    #[must_use]
    pub fn message(&self) -> String {
        self.groups()
            .into_iter()
            .filter(|g| !g.warning)
            .map(|g| g.render())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Warnings carried by the vector.
    #[must_use]
    pub fn warnings(&self) -> Vec<StatusWarning> {
        self.groups()
            .into_iter()
            .filter(|g| g.warning)
            .map(|g| StatusWarning {
                code: g.code.unwrap_or(0),
                message: g.render(),
            })
            .collect()
    }

    fn groups(&self) -> Vec<MessageGroup<'_>> {
        let mut groups: Vec<MessageGroup<'_>> = Vec::new();
        for arg in &self.args {
            match arg {
                StatusArg::Gds(0) => {}
                StatusArg::Gds(code) => groups.push(MessageGroup::code(*code, false)),
                StatusArg::Warning(code) => groups.push(MessageGroup::code(*code, true)),
                StatusArg::Interpreted(text) => groups.push(MessageGroup {
                    code: None,
                    warning: false,
                    interpreted: Some(text),
                    params: Vec::new(),
                }),
                StatusArg::String(s) => {
                    if let Some(g) = groups.last_mut() {
                        g.params.push(s.clone());
                    }
                }
                StatusArg::Number(n) => {
                    if let Some(g) = groups.last_mut() {
                        g.params.push(n.to_string());
                    }
                }
                StatusArg::Os { code, .. } => {
                    if let Some(g) = groups.last_mut() {
                        g.params.push(format!("OS error {code}"));
                    }
                }
                StatusArg::SqlState(_) => {}
            }
        }
        groups
    }

    /// Decode a status vector.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut args = Vec::new();
        loop {
            let kind = xdr::get_i32(src)?;
            let item = match kind {
                arg::END => break,
                arg::GDS => StatusArg::Gds(xdr::get_u32(src)?),
                arg::WARNING => StatusArg::Warning(xdr::get_u32(src)?),
                arg::STRING | arg::CSTRING => StatusArg::String(xdr::get_string(src)?),
                arg::INTERPRETED => StatusArg::Interpreted(xdr::get_string(src)?),
                arg::SQL_STATE => StatusArg::SqlState(xdr::get_string(src)?),
                arg::NUMBER => StatusArg::Number(xdr::get_i32(src)?),
                other if other > 0 => StatusArg::Os {
                    kind: other,
                    code: xdr::get_i32(src)?,
                },
                other => {
                    return Err(ProtocolError::InvalidField {
                        field: "status argument",
                        value: i64::from(other),
                    });
                }
            };
            args.push(item);
        }
        Ok(Self { args })
    }

    /// Encode the vector, including the terminating `isc_arg_end`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        for a in &self.args {
            match a {
                StatusArg::Gds(code) => {
                    xdr::put_i32(dst, arg::GDS);
                    xdr::put_u32(dst, *code);
                }
                StatusArg::Warning(code) => {
                    xdr::put_i32(dst, arg::WARNING);
                    xdr::put_u32(dst, *code);
                }
                StatusArg::String(s) => {
                    xdr::put_i32(dst, arg::STRING);
                    xdr::put_str(dst, s);
                }
                StatusArg::Number(n) => {
                    xdr::put_i32(dst, arg::NUMBER);
                    xdr::put_i32(dst, *n);
                }
                StatusArg::Interpreted(s) => {
                    xdr::put_i32(dst, arg::INTERPRETED);
                    xdr::put_str(dst, s);
                }
                StatusArg::SqlState(s) => {
                    xdr::put_i32(dst, arg::SQL_STATE);
                    xdr::put_str(dst, s);
                }
                StatusArg::Os { kind, code } => {
                    xdr::put_i32(dst, *kind);
                    xdr::put_i32(dst, *code);
                }
            }
        }
        xdr::put_i32(dst, arg::END);
    }
}

struct MessageGroup<'a> {
    code: Option<u32>,
    warning: bool,
    interpreted: Option<&'a str>,
    params: Vec<String>,
}

impl MessageGroup<'_> {
    fn code(code: u32, warning: bool) -> Self {
        Self {
            code: Some(code),
            warning,
            interpreted: None,
            params: Vec::new(),
        }
    }

    fn render(&self) -> String {
        if let Some(text) = self.interpreted {
            return text.to_string();
        }
        let code = self.code.unwrap_or(0);
        match message_template(code) {
            Some(template) => {
                let mut out = template.to_string();
                // Replace higher indices first so "@1" never clobbers "@10".
                for (i, param) in self.params.iter().enumerate().rev() {
                    out = out.replace(&format!("@{}", i + 1), param);
                }
                out
            }
            None if self.params.is_empty() => format!("Firebird error {code}"),
            None => format!("Firebird error {code}: {}", self.params.join(", ")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(vector: &StatusVector) -> StatusVector {
        let mut buf = BytesMut::new();
        vector.encode(&mut buf);
        StatusVector::decode(&mut buf.freeze()).unwrap()
    }

    #[test]
    fn test_success_vector() {
        let v = roundtrip(&StatusVector::success());
        assert!(!v.is_error());
        assert_eq!(v.message(), "");
        assert!(v.warnings().is_empty());
    }

    #[test]
    fn test_io_error_message() {
        let v = StatusVector::error(codes::IO_ERROR, &["open", "/data/missing.fdb"]);
        assert_eq!(v.error_code(), Some(codes::IO_ERROR));
        assert_eq!(
            v.message(),
            "I/O error during \"open\" operation for file \"/data/missing.fdb\""
        );
    }

    #[test]
    fn test_unknown_code_renders_generically() {
        let v = StatusVector::from_args(vec![
            StatusArg::Gds(336_330_835),
            StatusArg::Number(7),
        ]);
        assert_eq!(v.message(), "Firebird error 336330835: 7");
    }

    #[test]
    fn test_warnings_separated_from_errors() {
        let v = roundtrip(&StatusVector::from_args(vec![
            StatusArg::Gds(0),
            StatusArg::Warning(codes::RANDOM),
            StatusArg::String("cache size reduced".into()),
        ]));
        assert!(!v.is_error());
        let warnings = v.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, codes::RANDOM);
        assert_eq!(warnings[0].message, "cache size reduced");
    }

    #[test]
    fn test_sql_state_and_interpreted() {
        let v = roundtrip(&StatusVector::from_args(vec![
            StatusArg::Gds(codes::LOGIN),
            StatusArg::SqlState("28000".into()),
            StatusArg::Interpreted("extra detail".into()),
        ]));
        assert_eq!(v.sql_state(), Some("28000"));
        assert!(v.message().starts_with("Your user name and password"));
        assert!(v.message().ends_with("\nextra detail"));
    }

    #[test]
    fn test_truncated_vector() {
        let mut src = bytes::Bytes::from_static(&[0, 0, 0, 1]);
        assert!(StatusVector::decode(&mut src).is_err());
    }
}
